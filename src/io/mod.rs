//! Streaming CityGML and CityJSON input/output. Everything above this module talks
//! to [`crate::model`] types only; the wire format lives entirely here.

pub mod cityjson;
pub mod feature_xml;
pub mod namespaces;
mod reader;
mod writer;
pub(crate) mod xml_tree;

pub use cityjson::{
    read_cityjson, write_cityjson, write_cityjson_lines, CityJsonLinesReader, LodMappingPolicy,
    LodSelectionMode,
};
pub use namespaces::{namespace_table, version_from_namespace};
pub use reader::Reader;
pub use writer::Writer;
