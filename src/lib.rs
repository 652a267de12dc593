// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Merge cluster entries into a shared kubeconfig document.
//!
//! Several independent processes on one machine may want to install their
//! own cluster into the same kubeconfig document at the same time. Each of
//! them describes its entry with a [`Settings`] record and calls [`update`],
//! which locks the document by name, reads it, merges the entry in, and
//! writes it back. Entries installed by other processes survive, and so does
//! the current context unless the caller asks to replace it.
//!
//! Callers that manage their own locking and persistence can project
//! settings into an in-memory [`Document`] directly through
//! [`populate_from_settings`].

pub mod document;
pub mod lock;
pub mod path;
pub mod populate;
pub mod settings;
pub mod store;
pub mod update;

#[doc(inline)]
pub use document::Document;

#[doc(inline)]
pub use populate::populate_from_settings;

#[doc(inline)]
pub use settings::Settings;

#[doc(inline)]
pub use update::{update, update_with};
