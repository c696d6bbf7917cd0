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
    mem::ManuallyDrop,
    num::NonZeroUsize,
    ptr::NonNull,
};

use crate::{report::debug_unreachable, runtime::handle::Persistent};

/// A discriminant of the [Wrapper] variants.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum WrapperKind {
    Struct,
    NativeObject,
    Block,
    Reference,
    Pointer,
    FunctionReference,
    Other,
}

/// A description of the native resource owned by an object-shaped
/// [ScriptValue](crate::runtime::ScriptValue), and of the way to release it.
///
/// Each variant carries exactly the state its release path needs. The
/// release rules are enforced by the disposal path of the
/// [ObjectManager](crate::runtime::ObjectManager):
///
///  - `Struct` owns a raw memory block holding an inline native value. The
///    block is freed on release.
///  - `NativeObject` holds the identity of a reference-counted native
///    object. Release erases the identity's entry from the instance
///    registry; the native side owns the object itself.
///  - `Block` owns the memory of a compiled callable thunk, freed on
///    release.
///  - `Reference` optionally owns a nested handle to an inner wrapped value
///    and a memory block holding the referenced data. Release disposes the
///    inner value, detaches the handle, and frees the block.
///  - `Pointer` holds a raw native pointer and the `adopted` flag. Release
///    erases the pointer-registry record; the pointed-to memory is freed
///    only if adopted.
///  - `FunctionReference` owns a nested handle to a captured function value,
///    disposed and detached on release.
///  - `Other` owns nothing.
#[derive(Debug)]
pub enum Wrapper {
    Struct {
        data: Option<MemoryBlock>,
    },

    NativeObject {
        identity: Option<NativeIdentity>,
    },

    Block {
        thunk: Option<MemoryBlock>,
    },

    Reference {
        target: Option<Persistent>,
        data: Option<MemoryBlock>,
    },

    Pointer {
        data: Option<NativePointer>,
        adopted: bool,
    },

    FunctionReference {
        function: Option<Persistent>,
    },

    Other,
}

impl Wrapper {
    #[inline(always)]
    pub fn kind(&self) -> WrapperKind {
        match self {
            Self::Struct { .. } => WrapperKind::Struct,
            Self::NativeObject { .. } => WrapperKind::NativeObject,
            Self::Block { .. } => WrapperKind::Block,
            Self::Reference { .. } => WrapperKind::Reference,
            Self::Pointer { .. } => WrapperKind::Pointer,
            Self::FunctionReference { .. } => WrapperKind::FunctionReference,
            Self::Other => WrapperKind::Other,
        }
    }
}

/// An owned block of heap memory with an inline release routine.
///
/// Dropping the block releases the allocation through the routine recorded
/// at construction.
pub struct MemoryBlock {
    head: NonNull<()>,
    length: usize,
    capacity: usize,
    drop_fn: unsafe fn(head: *mut (), length: usize, capacity: usize),
}

// Safety: The block exclusively owns its allocation.
unsafe impl Send for MemoryBlock {}

impl Debug for MemoryBlock {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MemoryBlock")
            .field("address", &self.address())
            .field("length", &self.length)
            .finish()
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        // Safety: The drop_fn contract is established at construction.
        unsafe { (self.drop_fn)(self.head.as_ptr(), self.length, self.capacity) }
    }
}

impl MemoryBlock {
    /// Turns a vector into an owned memory block.
    pub fn from_vec<T: Send + 'static>(vector: Vec<T>) -> Self {
        let mut vector = ManuallyDrop::new(vector);

        // Safety: `Vec::as_mut_ptr` returns possibly dangling,
        //         but non null pointer.
        let head = unsafe { NonNull::new_unchecked(vector.as_mut_ptr() as *mut ()) };

        Self {
            head,
            length: vector.len(),
            capacity: vector.capacity(),
            drop_fn: drop_vec::<T>,
        }
    }

    /// Allocates a zero-initialized block of `size` bytes.
    #[inline(always)]
    pub fn zeroed(size: usize) -> Self {
        Self::from_vec(vec![0u8; size])
    }

    // Safety:
    //   1. `head` points to a slice of exactly `capacity` allocated items.
    //   2. First `length` items are properly initialized.
    //   3. `drop_fn` fully releases the allocation described by its
    //      arguments.
    pub(crate) unsafe fn from_raw_parts(
        head: NonNull<()>,
        length: usize,
        capacity: usize,
        drop_fn: unsafe fn(*mut (), usize, usize),
    ) -> Self {
        Self {
            head,
            length,
            capacity,
            drop_fn,
        }
    }

    #[inline(always)]
    pub fn address(&self) -> NonZeroUsize {
        // Safety: NonNull casting to NonZeroUsize.
        unsafe { NonZeroUsize::new_unchecked(self.head.as_ptr() as *mut u8 as usize) }
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut () {
        self.head.as_ptr()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

// Safety: (contract of MemoryBlock drop_fn)
//   1. `head` points to slice of exactly `capacity` allocated
//      and properly aligned items.
//   2. First `length` items are properly initialized.
//   3. The slice was allocated by the global allocator.
unsafe fn drop_vec<T>(head: *mut (), length: usize, capacity: usize) {
    if length > capacity {
        // Safety: Upheld by 1 and 2.
        unsafe { debug_unreachable!("Vector length is larger than capacity.") }
    }

    // Safety: Upheld by the caller.
    let _ = unsafe { Vec::from_raw_parts(head.cast::<T>(), length, capacity) };
}

/// An identity of a reference-counted native object.
///
/// The identity is an opaque address-like key into the instance registry. It
/// grants no access to the native object and carries no ownership.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct NativeIdentity(NonZeroUsize);

impl NativeIdentity {
    #[inline(always)]
    pub fn from_address(address: NonZeroUsize) -> Self {
        Self(address)
    }

    #[inline(always)]
    pub fn from_ptr(pointer: NonNull<()>) -> Self {
        // Safety: NonNull casting to NonZeroUsize.
        Self(unsafe { NonZeroUsize::new_unchecked(pointer.as_ptr() as usize) })
    }

    #[inline(always)]
    pub fn address(&self) -> NonZeroUsize {
        self.0
    }
}

/// A raw pointer to native memory held by a
/// [Pointer](Wrapper::Pointer) wrapper.
///
/// Pointers either alias foreign memory owned by the native side, or carry
/// the release routine of a bridge-owned allocation that the wrapper
/// adopted. Foreign pointers are structurally impossible to free: their
/// [release](Self::release) is a no-op.
///
/// NativePointer intentionally has no Drop implementation. The pointed-to
/// memory is freed exclusively by the disposal path of an adopted wrapper.
pub struct NativePointer {
    head: NonNull<()>,
    length: usize,
    capacity: usize,
    drop_fn: Option<unsafe fn(head: *mut (), length: usize, capacity: usize)>,
}

// Safety: Adopted pointers exclusively own their allocation; foreign
//         pointers are opaque aliases that this type never dereferences.
unsafe impl Send for NativePointer {}

impl Debug for NativePointer {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NativePointer")
            .field("address", &self.address())
            .field("owned", &self.drop_fn.is_some())
            .finish()
    }
}

impl NativePointer {
    /// Wraps a pointer to memory owned by the native side.
    #[inline(always)]
    pub fn foreign(head: NonNull<()>) -> Self {
        Self {
            head,
            length: 0,
            capacity: 0,
            drop_fn: None,
        }
    }

    /// Takes over a bridge-owned allocation, keeping its release routine.
    pub fn adopt(block: MemoryBlock) -> Self {
        let block = ManuallyDrop::new(block);

        Self {
            head: block.head,
            length: block.length,
            capacity: block.capacity,
            drop_fn: Some(block.drop_fn),
        }
    }

    // Safety:
    //   1. `head` points to a slice of exactly `capacity` allocated items.
    //   2. First `length` items are properly initialized.
    //   3. If `drop_fn` is present, it fully releases the allocation
    //      described by its arguments.
    pub(crate) unsafe fn from_raw_parts(
        head: NonNull<()>,
        length: usize,
        capacity: usize,
        drop_fn: Option<unsafe fn(*mut (), usize, usize)>,
    ) -> Self {
        Self {
            head,
            length,
            capacity,
            drop_fn,
        }
    }

    #[inline(always)]
    pub fn address(&self) -> NonZeroUsize {
        // Safety: NonNull casting to NonZeroUsize.
        unsafe { NonZeroUsize::new_unchecked(self.head.as_ptr() as *mut u8 as usize) }
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut () {
        self.head.as_ptr()
    }

    /// Releases the allocation of an adopted pointer. A no-op for foreign
    /// pointers.
    pub(crate) fn release(self) {
        let Some(drop_fn) = self.drop_fn else {
            return;
        };

        // Safety: The drop_fn contract is established at construction.
        unsafe { drop_fn(self.head.as_ptr(), self.length, self.capacity) }
    }
}
