//! Storage backends for tilescan.
//!
//! The instrument writes its own per-tile files; this crate adds the combined
//! frame stack of each tile as a multi-page 16-bit TIFF next to them.

pub mod tiff_writer;

pub use tiff_writer::TiffStackWriter;
