//! Object header message type identifiers.

/// Header message types the reader interprets; everything else is carried as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Nil,
    Dataspace,
    LinkInfo,
    Datatype,
    FillValueOld,
    FillValue,
    Link,
    DataLayout,
    GroupInfo,
    FilterPipeline,
    Attribute,
    Continuation,
    SymbolTable,
    ModificationTime,
    AttributeInfo,
    Unknown(u16),
}

/// Wire ids of the interpreted types.
const IDS: [(u16, MessageType); 15] = [
    (0x00, MessageType::Nil),
    (0x01, MessageType::Dataspace),
    (0x02, MessageType::LinkInfo),
    (0x03, MessageType::Datatype),
    (0x04, MessageType::FillValueOld),
    (0x05, MessageType::FillValue),
    (0x06, MessageType::Link),
    (0x08, MessageType::DataLayout),
    (0x0a, MessageType::GroupInfo),
    (0x0b, MessageType::FilterPipeline),
    (0x0c, MessageType::Attribute),
    (0x10, MessageType::Continuation),
    (0x11, MessageType::SymbolTable),
    (0x12, MessageType::ModificationTime),
    (0x15, MessageType::AttributeInfo),
];

impl MessageType {
    pub fn from_u16(id: u16) -> MessageType {
        IDS.iter()
            .find(|(known, _)| *known == id)
            .map_or(MessageType::Unknown(id), |&(_, t)| t)
    }

    pub fn to_u16(self) -> u16 {
        match self {
            MessageType::Unknown(id) => id,
            known => IDS.iter().find(|(_, t)| *t == known).map_or(0, |&(id, _)| id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ids_roundtrip() {
        for (id, t) in IDS {
            assert_eq!(MessageType::from_u16(id), t);
            assert_eq!(t.to_u16(), id);
        }
        assert_eq!(MessageType::from_u16(0x0c), MessageType::Attribute);
        assert_eq!(MessageType::from_u16(0x7), MessageType::Unknown(0x7));
    }
}
