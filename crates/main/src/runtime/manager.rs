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

use log::trace;

use crate::runtime::{
    handle::{Finalizer, WeakHandle},
    registry::Registries,
    value::{ScriptValue, Slot, ValueCell, ValueKind},
    wrapper::Wrapper,
    BRIDGE_LOG,
};

/// The disposal engine of the bridge.
///
/// The ObjectManager ties the lifetime of native resources to the lifetime
/// of the script values wrapping them. A wrapped value is
/// [registered](Self::register) for weak tracking right after construction.
/// When the value becomes unreachable from script code, the engine invokes a
/// one-shot finalizer that [disposes](Self::dispose_value) the value:
/// releases the native resource described by the value's [Wrapper], updates
/// the [registries](Registries), and invalidates the tracking handle.
///
/// Disposal is idempotent per value. The first pass takes the wrapper out of
/// the value's first storage slot and overwrites the slot with the undefined
/// sentinel, so any subsequent pass finds nothing to release.
pub struct ObjectManager;

impl ObjectManager {
    /// Registers `value` for weak tracking.
    ///
    /// Arms a one-shot finalizer that disposes the value when the last
    /// strong handle is dropped, and returns the weak tracking handle. The
    /// handle is typically stored alongside the wrapped native identity (in
    /// a registry) for later lookup, or kept by value construction code for
    /// manual disposal paths.
    ///
    /// The caller guarantees that `value` has not been registered before.
    /// This function has no side effect on native resources.
    pub fn register(registries: &Registries, value: &ScriptValue) -> WeakHandle {
        let state = WeakCallbackState {
            registries: registries.clone(),
        };

        value.cell().arm_finalizer(Box::new(state));

        WeakHandle::track(value)
    }

    /// Releases the native resource owned by `value`.
    ///
    /// This is the manual, synchronous release path. The same disposal runs
    /// automatically through the finalizer armed by [register](Self::register)
    /// when the value becomes unreachable; calling both is safe because the
    /// second pass is a no-op.
    ///
    /// Non-object values, objects without storage slots, "super" alias
    /// instances, and values without a wrapper are all left intact. A
    /// malformed wrapper releases whatever it safely can: every unexpected
    /// shape degrades to a local no-op for that sub-step rather than
    /// aborting the disposal of the rest of the object.
    #[inline(always)]
    pub fn dispose_value(registries: &Registries, value: &ScriptValue) {
        Self::dispose_cell(registries, value.cell());
    }

    pub(crate) fn dispose_cell(registries: &Registries, cell: &ValueCell) {
        let ValueKind::Object(body) = cell.kind() else {
            return;
        };

        let wrapper = {
            let mut slots = body.slots();

            if slots.is_empty() {
                return;
            }

            if let Some(Slot::Str(_)) = slots.get(1) {
                // A "super" alias view: the primary instance owns the wrapper.
                return;
            }

            let pointer = match slots.first() {
                Some(Slot::External(pointer)) => *pointer,

                // Nothing to release.
                _ => return,
            };

            if pointer.is_null() {
                slots[0] = Slot::Undefined;

                return;
            }

            // The slot is overwritten before the release actions run, which
            // makes re-entrant and repeated disposal of this value a no-op.
            slots[0] = Slot::Undefined;

            // Safety: The pointer was produced by Box::into_raw during the
            //         wrapper installation, and the primary instance's first
            //         slot held the only owning copy. The slot is already
            //         overwritten under the lock above, so the pointer is
            //         taken back exactly once.
            unsafe { Box::from_raw(pointer) }
        };

        Self::release_wrapper(registries, *wrapper);
    }

    fn release_wrapper(registries: &Registries, wrapper: Wrapper) {
        match wrapper {
            Wrapper::Struct { data } => {
                let Some(data) = data else {
                    return;
                };

                trace!(
                    target: BRIDGE_LOG,
                    "Releasing struct memory at {:#x}.",
                    data.address(),
                );

                drop(data);
            }

            Wrapper::NativeObject { identity } => {
                let Some(identity) = identity else {
                    return;
                };

                if registries.instances().erase(&identity).is_some() {
                    trace!(
                        target: BRIDGE_LOG,
                        "Native instance {:#x} unregistered.",
                        identity.address(),
                    );
                }
            }

            Wrapper::Block { thunk } => {
                let Some(thunk) = thunk else {
                    return;
                };

                trace!(
                    target: BRIDGE_LOG,
                    "Releasing block thunk at {:#x}.",
                    thunk.address(),
                );

                drop(thunk);
            }

            Wrapper::Reference { target, data } => {
                if let Some(mut target) = target {
                    if let Some(inner) = target.get() {
                        Self::dispose_cell(registries, inner.cell());
                    }

                    target.reset();
                }

                if let Some(data) = data {
                    trace!(
                        target: BRIDGE_LOG,
                        "Releasing reference memory at {:#x}.",
                        data.address(),
                    );

                    drop(data);
                }
            }

            Wrapper::Pointer { data, adopted } => {
                let Some(data) = data else {
                    return;
                };

                let address = data.address();

                if let Some(record) = registries.pointers().erase(&address) {
                    // The removed entry's record is owned and dropped by the
                    // disposal path, not by the registry.
                    drop(record);

                    trace!(
                        target: BRIDGE_LOG,
                        "Native pointer {:#x} unregistered.",
                        address,
                    );
                }

                if adopted {
                    trace!(
                        target: BRIDGE_LOG,
                        "Releasing adopted pointer memory at {:#x}.",
                        address,
                    );

                    data.release();
                }
            }

            Wrapper::FunctionReference { function } => {
                let Some(mut function) = function else {
                    return;
                };

                if let Some(inner) = function.get() {
                    Self::dispose_cell(registries, inner.cell());
                }

                function.reset();
            }

            Wrapper::Other => (),
        }
    }
}

struct WeakCallbackState {
    registries: Registries,
}

impl Finalizer for WeakCallbackState {
    fn finalize(self: Box<Self>, cell: &ValueCell) {
        ObjectManager::dispose_cell(&self.registries, cell);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        num::NonZeroUsize,
        ptr::NonNull,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use crate::runtime::{
        handle::Persistent,
        manager::ObjectManager,
        registry::{PointerRecord, Registries},
        value::{ScriptValue, Slot},
        wrapper::{MemoryBlock, NativeIdentity, NativePointer, Wrapper},
    };

    fn counted_block(
        size: usize,
        drop_fn: unsafe fn(*mut (), usize, usize),
    ) -> (MemoryBlock, NonZeroUsize) {
        let mut vector = std::mem::ManuallyDrop::new(vec![0u8; size]);

        let head = NonNull::new(vector.as_mut_ptr() as *mut ()).expect("non null vector head");

        let block =
            unsafe { MemoryBlock::from_raw_parts(head, vector.len(), vector.capacity(), drop_fn) };

        let address = block.address();

        (block, address)
    }

    #[test]
    fn test_dispose_primitive_values_is_noop() {
        let registries = Registries::new();

        ObjectManager::dispose_value(&registries, &ScriptValue::undefined());
        ObjectManager::dispose_value(&registries, &ScriptValue::null());
        ObjectManager::dispose_value(&registries, &ScriptValue::boolean(true));
        ObjectManager::dispose_value(&registries, &ScriptValue::number(3.14));
        ObjectManager::dispose_value(&registries, &ScriptValue::string("payload"));
    }

    #[test]
    fn test_dispose_object_without_slots_is_noop() {
        let registries = Registries::new();

        let value = ScriptValue::object(0);

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(value.slot_count(), 0);
    }

    #[test]
    fn test_dispose_object_without_wrapper_is_noop() {
        let registries = Registries::new();

        let value = ScriptValue::object(1);

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(value.get_slot(0), Some(Slot::Undefined));

        value.set_slot(0, Slot::Null);

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(value.get_slot(0), Some(Slot::Null));
    }

    #[test]
    fn test_null_wrapper_pointer_clears_slot() {
        let registries = Registries::new();

        let value = ScriptValue::object(1);

        value.set_slot(0, Slot::External(std::ptr::null_mut()));

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(value.get_slot(0), Some(Slot::Undefined));
    }

    #[test]
    fn test_struct_release_is_idempotent() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn drop_hook(head: *mut (), length: usize, capacity: usize) {
            let _ = DROPS.fetch_add(1, Ordering::SeqCst);

            // Safety: Upheld by the counted_block setup.
            let _ = unsafe { Vec::from_raw_parts(head.cast::<u8>(), length, capacity) };
        }

        let registries = Registries::new();

        let (block, _) = counted_block(32, drop_hook);

        let value = ScriptValue::object(1);

        value.install_wrapper(Wrapper::Struct { data: Some(block) });

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        assert_eq!(value.get_slot(0), Some(Slot::Undefined));

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_super_alias_never_releases() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn drop_hook(head: *mut (), length: usize, capacity: usize) {
            let _ = DROPS.fetch_add(1, Ordering::SeqCst);

            // Safety: Upheld by the counted_block setup.
            let _ = unsafe { Vec::from_raw_parts(head.cast::<u8>(), length, capacity) };
        }

        let registries = Registries::new();

        let (block, _) = counted_block(32, drop_hook);

        let value = ScriptValue::object(2);

        value.install_wrapper(Wrapper::Struct { data: Some(block) });
        value.set_slot(1, Slot::Str("base".into()));

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(DROPS.load(Ordering::SeqCst), 0);

        let pointer = match value.get_slot(0) {
            Some(Slot::External(pointer)) if !pointer.is_null() => pointer,
            slot => panic!("super alias slot was touched: {slot:?}"),
        };

        // Clearing the alias marker turns the value back into the primary
        // wrapper owner; the release must run now.
        value.set_slot(1, Slot::Undefined);

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        assert_eq!(value.get_slot(0), Some(Slot::Undefined));

        let _ = pointer;
    }

    #[test]
    fn test_block_release_frees_thunk() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn drop_hook(head: *mut (), length: usize, capacity: usize) {
            let _ = DROPS.fetch_add(1, Ordering::SeqCst);

            // Safety: Upheld by the counted_block setup.
            let _ = unsafe { Vec::from_raw_parts(head.cast::<u8>(), length, capacity) };
        }

        let registries = Registries::new();

        let (thunk, _) = counted_block(64, drop_hook);

        let value = ScriptValue::object(1);

        value.install_wrapper(Wrapper::Block { thunk: Some(thunk) });

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_native_object_erases_registry_entry() {
        let registries = Registries::new();

        let identity = NativeIdentity::from_address(NonZeroUsize::new(0x4000).unwrap());

        let value = ScriptValue::object(1);

        value.install_wrapper(Wrapper::NativeObject {
            identity: Some(identity),
        });

        let handle = ObjectManager::register(&registries, &value);

        registries.instances().insert(identity, handle.clone());

        assert_eq!(registries.instances().len(), 1);

        ObjectManager::dispose_value(&registries, &value);

        assert!(registries.instances().lookup(&identity).is_none());
        assert_eq!(value.get_slot(0), Some(Slot::Undefined));

        // The dangling identity degrades to a no-op.
        ObjectManager::dispose_value(&registries, &value);

        assert!(registries.instances().is_empty());
    }

    #[test]
    fn test_reference_disposes_nested_value() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn drop_hook(head: *mut (), length: usize, capacity: usize) {
            let _ = DROPS.fetch_add(1, Ordering::SeqCst);

            // Safety: Upheld by the counted_block setup.
            let _ = unsafe { Vec::from_raw_parts(head.cast::<u8>(), length, capacity) };
        }

        let registries = Registries::new();

        let identity = NativeIdentity::from_address(NonZeroUsize::new(0x5000).unwrap());

        let inner = ScriptValue::object(1);

        inner.install_wrapper(Wrapper::NativeObject {
            identity: Some(identity),
        });

        registries
            .instances()
            .insert(identity, ObjectManager::register(&registries, &inner));

        let (block, _) = counted_block(16, drop_hook);

        let outer = ScriptValue::object(1);

        outer.install_wrapper(Wrapper::Reference {
            target: Some(Persistent::new(inner.clone())),
            data: Some(block),
        });

        ObjectManager::dispose_value(&registries, &outer);

        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        assert!(registries.instances().lookup(&identity).is_none());
        assert_eq!(inner.get_slot(0), Some(Slot::Undefined));
        assert_eq!(outer.get_slot(0), Some(Slot::Undefined));
    }

    #[test]
    fn test_function_reference_disposes_captured_value() {
        let registries = Registries::new();

        let identity = NativeIdentity::from_address(NonZeroUsize::new(0x6000).unwrap());

        let captured = ScriptValue::object(1);

        captured.install_wrapper(Wrapper::NativeObject {
            identity: Some(identity),
        });

        registries
            .instances()
            .insert(identity, ObjectManager::register(&registries, &captured));

        let value = ScriptValue::object(1);

        value.install_wrapper(Wrapper::FunctionReference {
            function: Some(Persistent::new(captured.clone())),
        });

        ObjectManager::dispose_value(&registries, &value);

        assert!(registries.instances().lookup(&identity).is_none());
        assert_eq!(captured.get_slot(0), Some(Slot::Undefined));
    }

    #[test]
    fn test_adopted_pointer_frees_memory() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn drop_hook(head: *mut (), length: usize, capacity: usize) {
            let _ = DROPS.fetch_add(1, Ordering::SeqCst);

            // Safety: Upheld by the counted_block setup.
            let _ = unsafe { Vec::from_raw_parts(head.cast::<u8>(), length, capacity) };
        }

        let registries = Registries::new();

        let (block, address) = counted_block(24, drop_hook);

        let value = ScriptValue::object(1);

        let handle = ObjectManager::register(&registries, &value);

        registries
            .pointers()
            .insert(address, Box::new(PointerRecord::new(handle)));

        value.install_wrapper(Wrapper::Pointer {
            data: Some(NativePointer::adopt(block)),
            adopted: true,
        });

        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        assert!(registries.pointers().lookup(&address).is_none());
        assert!(registries.pointers().is_empty());
    }

    #[test]
    fn test_foreign_pointer_keeps_memory() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn drop_hook(head: *mut (), length: usize, capacity: usize) {
            let _ = DROPS.fetch_add(1, Ordering::SeqCst);

            // Safety: Upheld by the counted_block setup.
            let _ = unsafe { Vec::from_raw_parts(head.cast::<u8>(), length, capacity) };
        }

        let registries = Registries::new();

        let mut vector = std::mem::ManuallyDrop::new(vec![0u8; 24]);

        let head = NonNull::new(vector.as_mut_ptr() as *mut ()).expect("non null vector head");
        let length = vector.len();
        let capacity = vector.capacity();

        let block = unsafe { MemoryBlock::from_raw_parts(head, length, capacity, drop_hook) };

        let address = block.address();
        let pointer = NativePointer::adopt(block);

        let value = ScriptValue::object(1);

        let handle = ObjectManager::register(&registries, &value);

        registries
            .pointers()
            .insert(address, Box::new(PointerRecord::new(handle)));

        value.install_wrapper(Wrapper::Pointer {
            data: Some(pointer),
            adopted: false,
        });

        ObjectManager::dispose_value(&registries, &value);

        // The registry entry is gone, but the memory is owned by the native
        // side and must survive.
        assert_eq!(DROPS.load(Ordering::SeqCst), 0);
        assert!(registries.pointers().lookup(&address).is_none());

        // Reclaims the allocation the bridge deliberately left alive.
        unsafe { drop_hook(head.as_ptr(), length, capacity) };

        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finalizer_releases_on_last_drop() {
        let registries = Registries::new();

        let identity = NativeIdentity::from_address(NonZeroUsize::new(0x7000).unwrap());

        let value = ScriptValue::object(1);

        value.install_wrapper(Wrapper::NativeObject {
            identity: Some(identity),
        });

        let handle = ObjectManager::register(&registries, &value);

        registries.instances().insert(identity, handle.clone());

        let clone = value.clone();

        drop(value);

        assert!(registries.instances().lookup(&identity).is_some());
        assert!(handle.resolve().is_some());

        drop(clone);

        assert!(registries.instances().lookup(&identity).is_none());
        assert!(handle.resolve().is_none());
    }

    #[test]
    fn test_manual_dispose_then_finalize_is_noop() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn drop_hook(head: *mut (), length: usize, capacity: usize) {
            let _ = DROPS.fetch_add(1, Ordering::SeqCst);

            // Safety: Upheld by the counted_block setup.
            let _ = unsafe { Vec::from_raw_parts(head.cast::<u8>(), length, capacity) };
        }

        let registries = Registries::new();

        let (block, _) = counted_block(8, drop_hook);

        let value = ScriptValue::object(1);

        value.install_wrapper(Wrapper::Struct { data: Some(block) });

        let _handle = ObjectManager::register(&registries, &value);

        // The synchronous release path, e.g. during value replacement.
        ObjectManager::dispose_value(&registries, &value);

        assert_eq!(DROPS.load(Ordering::SeqCst), 1);

        // The finalizer pass over the cleared slot is a full no-op.
        drop(value);

        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_wrapper_fields_degrade_to_noop() {
        let registries = Registries::new();

        for wrapper in [
            Wrapper::Struct { data: None },
            Wrapper::NativeObject { identity: None },
            Wrapper::Block { thunk: None },
            Wrapper::Reference {
                target: None,
                data: None,
            },
            Wrapper::Pointer {
                data: None,
                adopted: true,
            },
            Wrapper::FunctionReference { function: None },
            Wrapper::Other,
        ] {
            let value = ScriptValue::object(1);

            value.install_wrapper(wrapper);

            ObjectManager::dispose_value(&registries, &value);

            assert_eq!(value.get_slot(0), Some(Slot::Undefined));
        }
    }
}
