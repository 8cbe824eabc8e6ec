use std::io::BufRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    pub fn as_str(&self) -> &str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
            ObjectType::Tag => "tag",
        }
    }

    /// Parse the `<type> <size>\0` header of a loose object
    ///
    /// Leaves the reader positioned at the first payload byte.
    pub fn parse_object_header(data_reader: &mut impl BufRead) -> anyhow::Result<(ObjectType, u64)> {
        let mut object_type = Vec::new();
        data_reader.read_until(b' ', &mut object_type)?;

        let object_type = String::from_utf8(object_type)?;
        let object_type = ObjectType::try_from(object_type.trim())?;

        let mut size = Vec::new();
        data_reader.read_until(b'\0', &mut size)?;
        if size.pop() != Some(b'\0') {
            anyhow::bail!("Invalid object header: missing size terminator");
        }
        let size = std::str::from_utf8(&size)?.parse::<u64>()?;

        Ok((object_type, size))
    }
}

impl TryFrom<&str> for ObjectType {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> anyhow::Result<Self> {
        match value {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(anyhow::anyhow!("Invalid object type {value}")),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    #[case(b"blob 5\0hello".as_slice(), ObjectType::Blob, 5)]
    #[case(b"commit 0\0".as_slice(), ObjectType::Commit, 0)]
    #[case(b"tag 12\0object 1234".as_slice(), ObjectType::Tag, 12)]
    fn parses_loose_headers(#[case] data: &[u8], #[case] kind: ObjectType, #[case] size: u64) {
        let mut reader = Cursor::new(data);
        let (parsed_kind, parsed_size) = ObjectType::parse_object_header(&mut reader).unwrap();

        assert_eq!(parsed_kind, kind);
        assert_eq!(parsed_size, size);
    }

    #[test]
    fn rejects_unknown_type() {
        let mut reader = Cursor::new(b"note 1\0x".as_slice());
        assert!(ObjectType::parse_object_header(&mut reader).is_err());
    }
}
