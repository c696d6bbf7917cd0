////////////////////////////////////////////////////////////////////////////////
// This file is part of "Pons", an embeddable cross-runtime                   //
// interoperability platform.                                                 //
//                                                                            //
// This work is proprietary software with source-available code.              //
//                                                                            //
// To copy, use, distribute, or contribute to this work, you must agree to    //
// the terms of the General License Agreement:                                //
//                                                                            //
// https://github.com/Eliah-Lakhin/pons/blob/master/EULA.md                   //
//                                                                            //
// The agreement grants a Basic Commercial License, allowing you to use       //
// this work in non-commercial and limited commercial products with a total   //
// gross revenue cap. To remove this commercial limit for one of your         //
// products, you must acquire a Full Commercial License.                      //
//                                                                            //
// If you contribute to the source code, documentation, or related materials, //
// you must grant me an exclusive license to these contributions.             //
// Contributions are governed by the "Contributions" section of the General   //
// License Agreement.                                                         //
//                                                                            //
// Copying the work in parts is strictly forbidden, except as permitted       //
// under the General License Agreement.                                       //
//                                                                            //
// If you do not or cannot agree to the terms of this Agreement,              //
// do not use this work.                                                      //
//                                                                            //
// This work is provided "as is", without any warranties, express or implied, //
// except where such disclaimers are legally invalid.                         //
//                                                                            //
// Copyright (c) 2024 Ilya Lakhin (Илья Александрович Лахин).                 //
// All rights reserved.                                                       //
////////////////////////////////////////////////////////////////////////////////

use std::{
    fmt::{Debug, Formatter},
    sync::{
        atomic::{fence, AtomicUsize, Ordering},
        Arc,
        Mutex,
        MutexGuard,
        Weak,
    },
};

use compact_str::CompactString;

use crate::{
    report::system_panic,
    runtime::{handle::Finalizer, wrapper::Wrapper},
};

/// A tagged value of the embedded scripting engine.
///
/// The ScriptValue object is a cheap-to-clone strong handle. Cloning an
/// instance increases the script-side reference count, and dropping an
/// instance decreases it. When the last strong handle is dropped, the value
/// becomes unreachable from script code, and the engine invokes the one-shot
/// finalizer armed via
/// [ObjectManager::register](crate::runtime::ObjectManager::register)
/// (if any).
///
/// Only object-shaped values carry internal storage [slots](Slot). The first
/// slot is reserved for the [Wrapper] that describes the native resource
/// owned by the value. The second slot, when it holds a marker string,
/// denotes a "super" alias: an instance representing a base-class view of
/// another instance that shares the primary instance's wrapper without
/// owning it.
pub struct ScriptValue {
    cell: Arc<ValueCell>,
}

impl Debug for ScriptValue {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cell.kind {
            ValueKind::Undefined => formatter.write_str("undefined"),
            ValueKind::Null => formatter.write_str("null"),
            ValueKind::Bool(value) => Debug::fmt(value, formatter),
            ValueKind::Number(value) => Debug::fmt(value, formatter),
            ValueKind::String(value) => Debug::fmt(value, formatter),

            ValueKind::Object(body) => formatter
                .debug_struct("Object")
                .field("slots", &body.slots().len())
                .finish(),
        }
    }
}

impl Clone for ScriptValue {
    #[inline(always)]
    fn clone(&self) -> Self {
        // Relaxed suffices: the caller already owns at least one live handle.
        let _ = self.cell.script_refs.fetch_add(1, Ordering::Relaxed);

        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl Drop for ScriptValue {
    fn drop(&mut self) {
        if self.cell.script_refs.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }

        fence(Ordering::Acquire);

        self.cell.run_finalizer();
    }
}

impl ScriptValue {
    /// Creates the `undefined` value.
    #[inline(always)]
    pub fn undefined() -> Self {
        Self::from_kind(ValueKind::Undefined)
    }

    /// Creates the `null` value.
    #[inline(always)]
    pub fn null() -> Self {
        Self::from_kind(ValueKind::Null)
    }

    /// Creates a boolean value.
    #[inline(always)]
    pub fn boolean(value: bool) -> Self {
        Self::from_kind(ValueKind::Bool(value))
    }

    /// Creates a numeric value.
    #[inline(always)]
    pub fn number(value: f64) -> Self {
        Self::from_kind(ValueKind::Number(value))
    }

    /// Creates a string value.
    #[inline(always)]
    pub fn string(value: impl Into<CompactString>) -> Self {
        Self::from_kind(ValueKind::String(value.into()))
    }

    /// Creates an object-shaped value with `slots` internal storage slots,
    /// each initialized to [Slot::Undefined].
    #[inline(always)]
    pub fn object(slots: usize) -> Self {
        Self::from_kind(ValueKind::Object(ObjectBody {
            slots: Mutex::new(vec![Slot::Undefined; slots]),
        }))
    }

    #[inline(always)]
    pub fn is_undefined(&self) -> bool {
        matches!(&self.cell.kind, ValueKind::Undefined)
    }

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        matches!(&self.cell.kind, ValueKind::Null)
    }

    #[inline(always)]
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(&self.cell.kind, ValueKind::Undefined | ValueKind::Null)
    }

    #[inline(always)]
    pub fn is_object(&self) -> bool {
        matches!(&self.cell.kind, ValueKind::Object(_))
    }

    /// Returns the string content of a string value.
    #[inline(always)]
    pub fn as_str(&self) -> Option<&str> {
        match &self.cell.kind {
            ValueKind::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the number of internal storage slots.
    ///
    /// Non-object values have no storage slots.
    pub fn slot_count(&self) -> usize {
        match &self.cell.kind {
            ValueKind::Object(body) => body.slots().len(),
            _ => 0,
        }
    }

    /// Reads the internal storage slot `index`.
    ///
    /// Returns None if the value is not object-shaped, or the index is out of
    /// bounds.
    ///
    /// The [external](Slot::External) variant of the returned slot is a
    /// non-owning alias of the wrapper attached to this value.
    pub fn get_slot(&self, index: usize) -> Option<Slot> {
        match &self.cell.kind {
            ValueKind::Object(body) => body.slots().get(index).cloned(),
            _ => None,
        }
    }

    /// Overwrites the internal storage slot `index`.
    ///
    /// Writing into a non-object value or outside of the slot range is a
    /// programming error of the embedding.
    pub fn set_slot(&self, index: usize, slot: Slot) {
        let ValueKind::Object(body) = &self.cell.kind else {
            system_panic!("Slot write into a non-object value.");
        };

        let mut slots = body.slots();

        let Some(target) = slots.get_mut(index) else {
            system_panic!("Slot write out of bounds.");
        };

        *target = slot;
    }

    /// Attaches a [Wrapper] describing the native resource owned by this
    /// value.
    ///
    /// The wrapper is moved to the heap, and an opaque pointer to it is
    /// stored in the first internal storage slot. The pointer is reclaimed
    /// exactly once by the disposal path of the
    /// [ObjectManager](crate::runtime::ObjectManager).
    ///
    /// A value carries at most one wrapper. Installing a wrapper into a
    /// value that already has one, into a non-object value, or into an
    /// object without storage slots is a programming error of the embedding.
    pub fn install_wrapper(&self, wrapper: Wrapper) {
        let ValueKind::Object(body) = &self.cell.kind else {
            system_panic!("Wrapper installation into a non-object value.");
        };

        let mut slots = body.slots();

        let Some(slot) = slots.get_mut(0) else {
            system_panic!("Wrapper installation into an object without storage slots.");
        };

        if let Slot::External(pointer) = slot {
            if !pointer.is_null() {
                system_panic!("Multiple wrapper installation.");
            }
        }

        *slot = Slot::External(Box::into_raw(Box::new(wrapper)));
    }

    #[inline(always)]
    fn from_kind(kind: ValueKind) -> Self {
        Self {
            cell: Arc::new(ValueCell {
                kind,
                script_refs: AtomicUsize::new(1),
                finalizer: Mutex::new(None),
            }),
        }
    }

    #[inline(always)]
    pub(crate) fn cell(&self) -> &ValueCell {
        &self.cell
    }

    #[inline(always)]
    pub(crate) fn weak_cell(&self) -> Weak<ValueCell> {
        Arc::downgrade(&self.cell)
    }
}

/// The content of an internal storage slot of an object-shaped
/// [ScriptValue].
#[derive(Clone, PartialEq, Debug)]
pub enum Slot {
    /// The slot sentinel. Freshly created objects and disposed wrapper slots
    /// hold this variant.
    Undefined,

    /// An explicit null payload.
    Null,

    /// A marker string. A marker in the second slot denotes a "super" alias
    /// instance.
    Str(CompactString),

    /// An opaque, possibly null pointer to the [Wrapper] attached to the
    /// value.
    ///
    /// The pointer is owned by the primary instance holding it in the first
    /// slot; "super" alias instances share the same pointer without owning
    /// it. Slots never release the pointee on their own.
    External(*mut Wrapper),
}

// Safety: The wrapper pointer of the External variant is owned by the primary
//         instance's slot array, and all slot access is serialized by the
//         ObjectBody lock.
unsafe impl Send for Slot {}

// Safety: Upheld by the Send impl reasoning above.
unsafe impl Sync for Slot {}

pub(crate) enum ValueKind {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(CompactString),
    Object(ObjectBody),
}

pub(crate) struct ObjectBody {
    slots: Mutex<Vec<Slot>>,
}

impl ObjectBody {
    #[inline(always)]
    pub(crate) fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

pub(crate) struct ValueCell {
    kind: ValueKind,
    script_refs: AtomicUsize,
    finalizer: Mutex<Option<Box<dyn Finalizer>>>,
}

impl ValueCell {
    #[inline(always)]
    pub(crate) fn kind(&self) -> &ValueKind {
        &self.kind
    }

    /// Arms the one-shot finalizer. The caller guarantees that the value has
    /// not been registered before.
    pub(crate) fn arm_finalizer(&self, finalizer: Box<dyn Finalizer>) {
        let mut guard = self
            .finalizer
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        if guard.is_some() {
            system_panic!("Multiple weak registration of a script value.");
        }

        *guard = Some(finalizer);
    }

    /// Upgrades a cell reference into a strong [ScriptValue] handle.
    ///
    /// Returns None if the script-side reference count already reached zero.
    /// A finalized value is never resurrected.
    pub(crate) fn try_acquire(cell: &Arc<ValueCell>) -> Option<ScriptValue> {
        let mut count = cell.script_refs.load(Ordering::Acquire);

        loop {
            if count == 0 {
                return None;
            }

            match cell.script_refs.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => count = actual,
            }
        }

        Some(ScriptValue {
            cell: Arc::clone(cell),
        })
    }

    fn run_finalizer(&self) {
        let state = {
            let mut guard = self
                .finalizer
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());

            guard.take()
        };

        let Some(state) = state else {
            return;
        };

        state.finalize(self);
    }
}
