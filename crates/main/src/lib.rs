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

//! # Pons
//!
//! Pons is an embeddable cross-runtime interoperability platform: a bridge
//! that lets a garbage-collected scripting engine hold references to objects
//! owned by a manually-managed, reference-counted native object system, and
//! vice versa.
//!
//! The crate covers the memory-safety core of the bridge:
//!
//!  - The [runtime] module provides the object-disposal engine. Script
//!    values that wrap native resources carry a
//!    [Wrapper](crate::runtime::Wrapper) describing the resource and the way
//!    to release it. The [ObjectManager](crate::runtime::ObjectManager)
//!    registers wrapped values for weak tracking and releases the correct
//!    resource for each wrapper kind exactly once, when the value becomes
//!    unreachable from script code or when the embedding disposes it
//!    manually. Process-lifetime [registries](crate::runtime::Registries)
//!    map native identities to the script handles wrapping them.
//!
//!  - The [tasks] module provides the thread-safe hand-off machinery: the
//!    [ConcurrentQueue](crate::tasks::ConcurrentQueue) moves string-encoded
//!    work items from producer threads to a single consumer with clean
//!    shutdown semantics, and the [QueueWorker](crate::tasks::QueueWorker)
//!    runs that consumer on a dedicated thread.
//!
//! The crate is a library layer: it installs no logger and spawns no threads
//! on its own (except through [QueueWorker](crate::tasks::QueueWorker)), and
//! it never aborts the embedding process while releasing malformed or
//! already-released wrappers.

mod report;

pub mod runtime;
pub mod tasks;
