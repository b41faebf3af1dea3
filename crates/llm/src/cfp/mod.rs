//! Chat-Function-Protocol: an in-band textual encoding that lets a
//! tool-naive upstream model emulate structured function calling.

pub mod codec;
pub mod parser;

pub use codec::{CfpBlock, EncodeFields, ExtractedBlock};
pub use parser::{CfpStreamParser, Event};
