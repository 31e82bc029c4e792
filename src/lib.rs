//! zonedis, a lazily-indexed disassembly viewer engine for x86 code zones.
//!
//! A zone is a byte range of a file believed to contain code. The engine
//! indexes it once, seeks to any instruction line cheaply afterwards, labels
//! call and jump targets, and produces display records for whatever window a
//! viewport asks for. See [`view::ZoneView`] for where to start.
//!
//! [`view::ZoneView`]: view/struct.ZoneView.html

#![deny(missing_docs)]
#![deny(unused)]
#![deny(warnings)]
#![deny(unsafe_code)]

pub mod config;
pub mod dump;
pub mod error;
pub mod int;
pub mod isa;
pub mod map;
pub mod render;
pub mod source;
pub mod view;
pub mod zone;
