pub mod chunker;
pub mod parser;

pub use chunker::{clean_source, Chunk, TextChunker};
pub use parser::{DocumentParser, ParsedDocument};
