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
    sync::Weak,
};

use crate::runtime::value::{ScriptValue, ValueCell};

/// A detachable strong handle to a [ScriptValue].
///
/// Persistent handles keep the held value reachable from script code. Nested
/// [wrappers](crate::runtime::Wrapper) store Persistent handles to the inner
/// values they own; the disposal path of the
/// [ObjectManager](crate::runtime::ObjectManager) disposes the inner value
/// and then [resets](Self::reset) the handle.
#[derive(Debug, Default)]
pub struct Persistent {
    value: Option<ScriptValue>,
}

impl From<ScriptValue> for Persistent {
    #[inline(always)]
    fn from(value: ScriptValue) -> Self {
        Self::new(value)
    }
}

impl Persistent {
    /// Creates a handle holding `value`.
    #[inline(always)]
    pub fn new(value: ScriptValue) -> Self {
        Self { value: Some(value) }
    }

    /// Creates a detached handle.
    #[inline(always)]
    pub fn empty() -> Self {
        Self { value: None }
    }

    /// Resolves the held value.
    #[inline(always)]
    pub fn get(&self) -> Option<&ScriptValue> {
        self.value.as_ref()
    }

    /// Detaches the handle, releasing the strong reference to the held
    /// value.
    #[inline(always)]
    pub fn reset(&mut self) {
        self.value = None;
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

/// A weak tracking handle to a [ScriptValue], returned by
/// [ObjectManager::register](crate::runtime::ObjectManager::register).
///
/// The handle does not keep the value reachable. [Resolving](Self::resolve)
/// succeeds only while the value is still reachable from script code; a
/// finalized value is never resurrected.
///
/// Registries store WeakHandle entries so that the wrapped script handle of
/// a live native identity can be looked up without extending the value's
/// lifetime.
#[derive(Clone)]
pub struct WeakHandle {
    cell: Weak<ValueCell>,
}

impl Debug for WeakHandle {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self.resolve() {
            Some(_) => formatter.write_str("WeakHandle(live)"),
            None => formatter.write_str("WeakHandle(dead)"),
        }
    }
}

impl WeakHandle {
    /// Upgrades the handle into a strong [ScriptValue] handle.
    ///
    /// Returns None once the tracked value became unreachable.
    pub fn resolve(&self) -> Option<ScriptValue> {
        let cell = self.cell.upgrade()?;

        ValueCell::try_acquire(&cell)
    }

    #[inline(always)]
    pub(crate) fn track(value: &ScriptValue) -> Self {
        Self {
            cell: value.weak_cell(),
        }
    }
}

/// A one-shot finalization callback armed on a [ValueCell].
///
/// The engine invokes the callback on whatever thread drops the last strong
/// handle. The callback state is consumed by the invocation.
pub(crate) trait Finalizer: Send {
    fn finalize(self: Box<Self>, cell: &ValueCell);
}

#[cfg(test)]
mod tests {
    use crate::runtime::{
        handle::{Persistent, WeakHandle},
        value::ScriptValue,
    };

    #[test]
    fn test_persistent_reset_detaches() {
        let value = ScriptValue::object(1);

        let mut persistent = Persistent::new(value.clone());

        assert!(!persistent.is_empty());
        assert!(persistent.get().is_some());

        persistent.reset();

        assert!(persistent.is_empty());
        assert!(persistent.get().is_none());
    }

    #[test]
    fn test_weak_handle_resolves_live_value() {
        let value = ScriptValue::object(1);

        let handle = WeakHandle::track(&value);

        let resolved = handle.resolve().expect("value is alive");

        assert!(resolved.is_object());
    }

    #[test]
    fn test_weak_handle_refuses_dead_value() {
        let value = ScriptValue::object(1);

        let handle = WeakHandle::track(&value);

        drop(value);

        assert!(handle.resolve().is_none());
    }

    #[test]
    fn test_persistent_keeps_value_resolvable() {
        let value = ScriptValue::object(1);

        let persistent = Persistent::new(value.clone());
        let weak = WeakHandle::track(&value);

        drop(value);

        assert!(weak.resolve().is_some());

        drop(persistent);

        assert!(weak.resolve().is_none());
    }
}
