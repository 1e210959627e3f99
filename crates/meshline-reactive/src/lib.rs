//! Reactive mutable data containers.
//!
//! [`ObservableCell`] and the [`collections`] give `meshline`'s engine a way
//! to expose session state, validation flags, and registries to an embedder
//! as subscribable streams instead of ad-hoc callback lists.
//!
//! # Basic usage
//!
//! ```
//! use meshline_reactive::Observable;
//!
//! let mut foo = Observable::new(0u32);
//! assert_eq!(*foo, 0);
//! *foo.borrow_mut() = 1;
//! assert_eq!(*foo, 1);
//! ```
//!
//! # Subscribing to all modifications
//!
//! ```
//! use meshline_reactive::Observable;
//! use futures::{executor, StreamExt as _};
//!
//! executor::block_on(async {
//!     let mut foo = Observable::new(0u32);
//!     let mut changes = foo.subscribe();
//!     assert_eq!(changes.next().await.unwrap(), 0);
//!
//!     *foo.borrow_mut() = 1;
//!     assert_eq!(changes.next().await.unwrap(), 1);
//! });
//! ```

#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]
#![warn(missing_docs)]

pub mod collections;
pub mod field;
pub mod option;

#[doc(inline)]
pub use self::{
    field::{
        DroppedError, MutObservableFieldGuard, Observable, ObservableCell,
        ObservableField, OnObservableFieldModification, Whenable,
    },
    option::ObservableOption,
};
