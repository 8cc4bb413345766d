//! Self-describing, machine-portable binary data files.
//!
//! A file records its own numeric formats, derived types, and symbol
//! table, so data written on one machine reads correctly on any other:
//! byte order, integer width, and floating point format differences are
//! reconciled at read time. Entries are addressed by path expressions
//! that follow struct members, array indexes, and pointers stored in
//! the file, so `"nodes[3].next->value"` reads one number without
//! loading the rest.
//!
//! ```no_run
//! use portadb::{Heap, PdbFile};
//!
//! # fn main() -> portadb::PdbResult<()> {
//! let mut f = PdbFile::create(std::path::Path::new("run.pdb"))?;
//! let vals = [1.0f64, 2.0, 3.0];
//! let bytes: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
//! f.write("v(3)", "double", &bytes, &Heap::new())?;
//! f.close()?;
//!
//! let mut f = PdbFile::open_read(std::path::Path::new("run.pdb"))?;
//! let mut heap = Heap::new();
//! let middle = f.read("v[1]", &mut heap)?;
//! # Ok(())
//! # }
//! ```

pub mod chart;
pub mod convert;
pub mod engine;
pub mod error;
pub mod file;
pub mod heap;
pub mod path;
pub mod standard;
pub mod stream;
pub mod symtab;

pub use chart::{Chart, Defstr, Dimension, Member};
pub use error::{PdbError, PdbResult};
pub use file::PdbFile;
pub use heap::{Heap, HeapHandle};
pub use standard::{Alignment, ByteOrder, FloatFormat, MajorOrder, NumericStandard};
pub use stream::{ByteStream, FileStream, MemStream};
pub use symtab::{SymBlock, SymbolEntry, SymbolTable};
