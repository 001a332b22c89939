//! EDF/BDF file storage: header codec, terminal writer sink and a reader.

pub mod codec;
pub mod reader;
pub mod writer;

pub use reader::EdfReader;
pub use writer::EdfWriter;
