//! The partition artifact: a versioned, self-describing binary blob
//! written by `persist` and read back by a passive partition.
//!
//! Grounded on spec.md §4.1 step 5 and §6 ("Partition artifact" /
//! "Backwards compatibility"). Framing: a 4-byte little-endian version
//! tag followed by a bincode-encoded body, so an unrecognized version can
//! be rejected before attempting to decode a body whose shape might have
//! changed (`Error::Version`, not a generic parse failure).

use std::collections::HashMap;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::filesystem::StorePath;
use crate::ids::{Id, TypeIds};
use crate::schema::RecordSchema;
use crate::synopsis::PartitionSynopsis;

pub const PARTITION_ARTIFACT_VERSION: u32 = 0;

/// Opaque pointer to where this partition's segment payload lives,
/// embedded so a reader never has to guess a path-naming scheme
/// (spec.md §4.1 step 5, "store header").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreHeader {
    Local(Uuid),
    Archive(Uuid),
}

impl From<&StoreHeader> for StorePath {
    fn from(header: &StoreHeader) -> StorePath {
        match header {
            StoreHeader::Local(id) => StorePath::Local(*id),
            StoreHeader::Archive(id) => StorePath::Archive(*id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PartitionArtifactBody {
    id: Uuid,
    offset: Id,
    events: u64,
    schema: RecordSchema,
    type_ids: HashMap<String, TypeIds>,
    /// `(qualified-field-name, indexer-chunk)`, insertion order preserved
    /// as specified ("vector of (field-name, indexer-chunk)").
    indexer_chunks: Vec<(String, Vec<u8>)>,
    synopsis: PartitionSynopsis,
    store_header: StoreHeader,
}

#[derive(Debug, Clone)]
pub struct PartitionArtifact {
    pub id: Uuid,
    pub offset: Id,
    pub events: u64,
    pub schema: RecordSchema,
    pub type_ids: HashMap<String, TypeIds>,
    pub indexer_chunks: Vec<(String, Vec<u8>)>,
    pub synopsis: PartitionSynopsis,
    pub store_header: StoreHeader,
}

impl PartitionArtifact {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = PartitionArtifactBody {
            id: self.id,
            offset: self.offset,
            events: self.events,
            schema: self.schema.clone(),
            type_ids: self.type_ids.clone(),
            indexer_chunks: self.indexer_chunks.clone(),
            synopsis: self.synopsis.clone(),
            store_header: self.store_header.clone(),
        };
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(PARTITION_ARTIFACT_VERSION)?;
        let encoded = bincode::serialize(&body)?;
        out.extend_from_slice(&encoded);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<PartitionArtifact> {
        if bytes.len() < 4 {
            return Err(Error::Parse("partition artifact shorter than its version tag".to_string()));
        }
        let mut header = &bytes[..4];
        let version = header.read_u32::<LittleEndian>()?;
        if version != PARTITION_ARTIFACT_VERSION {
            return Err(Error::Version { found: version, expected: PARTITION_ARTIFACT_VERSION });
        }
        let body: PartitionArtifactBody = bincode::deserialize(&bytes[4..])?;
        Ok(PartitionArtifact {
            id: body.id,
            offset: body.offset,
            events: body.events,
            schema: body.schema,
            type_ids: body.type_ids,
            indexer_chunks: body.indexer_chunks,
            synopsis: body.synopsis,
            store_header: body.store_header,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Type};

    #[test]
    fn encode_decode_roundtrip() {
        let artifact = PartitionArtifact {
            id: Uuid::new_v4(),
            offset: 10,
            events: 5,
            schema: RecordSchema::new("conn", vec![Field::new("proto", Type::String)]),
            type_ids: HashMap::new(),
            indexer_chunks: vec![("conn.proto".to_string(), vec![1, 2, 3])],
            synopsis: PartitionSynopsis::new(),
            store_header: StoreHeader::Local(Uuid::new_v4()),
        };
        let bytes = artifact.encode().unwrap();
        let decoded = PartitionArtifact::decode(&bytes).unwrap();
        assert_eq!(decoded.id, artifact.id);
        assert_eq!(decoded.offset, artifact.offset);
        assert_eq!(decoded.indexer_chunks, artifact.indexer_chunks);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = vec![];
        bytes.write_u32::<LittleEndian>(PARTITION_ARTIFACT_VERSION + 1).unwrap();
        bytes.extend_from_slice(&[0u8; 8]);
        match PartitionArtifact::decode(&bytes) {
            Err(Error::Version { found, expected }) => {
                assert_eq!(found, PARTITION_ARTIFACT_VERSION + 1);
                assert_eq!(expected, PARTITION_ARTIFACT_VERSION);
            }
            other => panic!("expected Version error, got {other:?}"),
        }
    }
}
