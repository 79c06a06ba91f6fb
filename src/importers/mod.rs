//! Trade sources read from files exported by third-party tools.

pub mod zerion_csv;
