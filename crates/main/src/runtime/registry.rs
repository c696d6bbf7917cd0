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

use std::{num::NonZeroUsize, ops::Deref};

use ahash::RandomState;
use lady_deirdre::sync::{Shared, Table};

use crate::{
    report::debug_unreachable,
    runtime::{handle::WeakHandle, wrapper::NativeIdentity},
};

/// A process-lifetime mapping from native object identities to the weak
/// handles of the script values wrapping them.
///
/// The registry is an injected collaborator of the disposal engine: value
/// construction code inserts and looks entries up, while the
/// [ObjectManager](crate::runtime::ObjectManager) only
/// [erases](Self::erase) them.
pub struct InstanceRegistry {
    inner: Table<NativeIdentity, WeakHandle, RandomState>,
}

impl Default for InstanceRegistry {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            inner: Table::new(),
        }
    }

    /// Registers the wrapped script handle of a native identity.
    ///
    /// An existing entry under the same identity is replaced.
    pub fn insert(&self, identity: NativeIdentity, handle: WeakHandle) {
        let _ = self.inner.insert(identity, handle);
    }

    /// Returns a copy of the identity's entry.
    pub fn lookup(&self, identity: &NativeIdentity) -> Option<WeakHandle> {
        let shard_index = self.inner.shard_index_of(identity);

        let shard = match self.inner.shards().get(shard_index) {
            Some(shard) => shard,

            // Safety: shard_index_of always returns valid shard index.
            None => unsafe { debug_unreachable!("Shard index out of bounds.") },
        };

        let guard = shard.read().unwrap_or_else(|poison| poison.into_inner());

        guard.get(identity).cloned()
    }

    /// Removes the identity's entry, returning it if the identity was
    /// registered.
    pub fn erase(&self, identity: &NativeIdentity) -> Option<WeakHandle> {
        let shard_index = self.inner.shard_index_of(identity);

        let shard = match self.inner.shards().get(shard_index) {
            Some(shard) => shard,

            // Safety: shard_index_of always returns valid shard index.
            None => unsafe { debug_unreachable!("Shard index out of bounds.") },
        };

        let mut guard = shard.write().unwrap_or_else(|poison| poison.into_inner());

        guard.remove(identity)
    }

    /// Returns the current number of registered identities.
    pub fn len(&self) -> usize {
        let mut total = 0;

        for shard in self.inner.shards() {
            let guard = shard.read().unwrap_or_else(|poison| poison.into_inner());

            total += guard.deref().len();
        }

        total
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An entry of the [PointerRegistry].
///
/// The record is the auxiliary object owned by the registry entry. When the
/// disposal engine erases the entry, the removed record is dropped by the
/// disposal engine, not by the registry.
#[derive(Clone, Debug)]
pub struct PointerRecord {
    handle: WeakHandle,
}

impl PointerRecord {
    #[inline(always)]
    pub fn new(handle: WeakHandle) -> Self {
        Self { handle }
    }

    #[inline(always)]
    pub fn handle(&self) -> &WeakHandle {
        &self.handle
    }
}

/// A process-lifetime mapping from raw native pointer addresses to the
/// [records](PointerRecord) of the script values wrapping them.
pub struct PointerRegistry {
    inner: Table<NonZeroUsize, Box<PointerRecord>, RandomState>,
}

impl Default for PointerRegistry {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl PointerRegistry {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            inner: Table::new(),
        }
    }

    /// Registers the record of a wrapped pointer address.
    ///
    /// An existing entry under the same address is replaced.
    pub fn insert(&self, address: NonZeroUsize, record: Box<PointerRecord>) {
        let _ = self.inner.insert(address, record);
    }

    /// Returns a copy of the weak handle of the address entry.
    pub fn lookup(&self, address: &NonZeroUsize) -> Option<WeakHandle> {
        let shard_index = self.inner.shard_index_of(address);

        let shard = match self.inner.shards().get(shard_index) {
            Some(shard) => shard,

            // Safety: shard_index_of always returns valid shard index.
            None => unsafe { debug_unreachable!("Shard index out of bounds.") },
        };

        let guard = shard.read().unwrap_or_else(|poison| poison.into_inner());

        guard.get(address).map(|record| record.handle.clone())
    }

    /// Removes the address entry, returning the owned record if the address
    /// was registered.
    pub fn erase(&self, address: &NonZeroUsize) -> Option<Box<PointerRecord>> {
        let shard_index = self.inner.shard_index_of(address);

        let shard = match self.inner.shards().get(shard_index) {
            Some(shard) => shard,

            // Safety: shard_index_of always returns valid shard index.
            None => unsafe { debug_unreachable!("Shard index out of bounds.") },
        };

        let mut guard = shard.write().unwrap_or_else(|poison| poison.into_inner());

        guard.remove(address)
    }

    /// Returns the current number of registered addresses.
    pub fn len(&self) -> usize {
        let mut total = 0;

        for shard in self.inner.shards() {
            let guard = shard.read().unwrap_or_else(|poison| poison.into_inner());

            total += guard.deref().len();
        }

        total
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A cheap-to-clone bundle of the bridge registries.
///
/// The bundle is created once per embedding lifetime and passed by reference
/// to the disposal engine. Finalizer callbacks carry their own clone of the
/// bundle.
#[derive(Clone)]
pub struct Registries {
    instances: Shared<InstanceRegistry>,
    pointers: Shared<PointerRegistry>,
}

impl Default for Registries {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            instances: Shared::new(InstanceRegistry::new()),
            pointers: Shared::new(PointerRegistry::new()),
        }
    }

    #[inline(always)]
    pub fn instances(&self) -> &InstanceRegistry {
        self.instances.as_ref()
    }

    #[inline(always)]
    pub fn pointers(&self) -> &PointerRegistry {
        self.pointers.as_ref()
    }
}
