use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Result;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::io::BufRead;

/// Serialization into the loose object format, header included
pub trait Packable {
    fn serialize(&self) -> Result<Bytes>;
}

/// Parsing of an object payload (the header has already been consumed)
pub trait Unpackable {
    fn deserialize(reader: impl BufRead) -> Result<Self>
    where
        Self: Sized;
}

pub trait Object: Packable {
    fn object_type(&self) -> ObjectType;

    fn object_id(&self) -> Result<ObjectId> {
        let content = self.serialize()?;
        let mut hasher = Sha1::new();
        hasher.update(&content);

        ObjectId::from_bytes(&hasher.finalize())
    }
}

/// Prefix a payload with its `<type> <size>\0` header
pub(crate) fn with_header(object_type: ObjectType, content: &[u8]) -> Bytes {
    let mut bytes = format!("{} {}\0", object_type.as_str(), content.len()).into_bytes();
    bytes.extend_from_slice(content);
    Bytes::from(bytes)
}
