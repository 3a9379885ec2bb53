/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Main file / top-level module for the jitcore library.

// Make the analysis module public for fuzzing.
#[cfg(feature = "fuzzing")]
pub mod analysis;
#[cfg(not(feature = "fuzzing"))]
mod analysis;

pub mod bytecode;

mod basic_block;
mod checker;
mod class_model;
mod compilation_unit;
mod compiler;
mod convert;
mod data_structures;
mod expression;
mod inst_stream;
mod interface;
mod linear_scan;
mod live_range;
mod statement;
#[cfg(any(test, feature = "fuzzing"))]
mod test_vm;
mod vars;

pub use crate::interface::*;
