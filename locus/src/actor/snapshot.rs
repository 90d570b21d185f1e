//! Portable actor state for relocation.
//!
//! Only components implementing [`Transferable`] can be written into a
//! [`TransferSnapshot`]; the set of travelling components is therefore fixed
//! at compile time by what an actor's [`snapshot`](super::Actor::snapshot)
//! writes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::MessageCodec;
use crate::error::TransferError;
use crate::location::LocationType;

/// A component that travels with its actor during a transfer.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Inventory { items: Vec<u32> }
///
/// impl Transferable for Inventory {
///     const NAME: &'static str = "inventory";
/// }
/// ```
pub trait Transferable: Serialize + DeserializeOwned {
    /// Name of the component inside a snapshot.
    const NAME: &'static str;
}

/// Serialized actor handed to the destination fiber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSnapshot {
    /// [`Actor::KIND`](super::Actor::KIND) of the actor.
    pub actor_kind: String,
    /// Namespace the actor is located in.
    pub location_type: LocationType,
    /// Logical id inside the namespace.
    pub location_id: u64,
    /// `(component name, codec-encoded component)` pairs.
    pub components: Vec<(String, Vec<u8>)>,
}

/// Collects transferable components while taking a snapshot.
pub struct SnapshotWriter<'a, C: MessageCodec> {
    codec: &'a C,
    components: Vec<(String, Vec<u8>)>,
}

impl<'a, C: MessageCodec> SnapshotWriter<'a, C> {
    pub(crate) fn new(codec: &'a C) -> Self {
        Self {
            codec,
            components: Vec::new(),
        }
    }

    /// Add one component. Writing the same component twice keeps the last.
    pub fn put<T: Transferable>(&mut self, component: &T) -> Result<(), TransferError> {
        let bytes = self.codec.encode(component)?;
        self.components.retain(|(name, _)| name != T::NAME);
        self.components.push((T::NAME.to_string(), bytes));
        Ok(())
    }

    pub(crate) fn finish(
        self,
        actor_kind: &str,
        location_type: LocationType,
        location_id: u64,
    ) -> TransferSnapshot {
        TransferSnapshot {
            actor_kind: actor_kind.to_string(),
            location_type,
            location_id,
            components: self.components,
        }
    }
}

/// Reads transferable components back on the destination fiber.
pub struct SnapshotReader<'a, C: MessageCodec> {
    codec: &'a C,
    snapshot: &'a TransferSnapshot,
}

impl<'a, C: MessageCodec> SnapshotReader<'a, C> {
    pub(crate) fn new(codec: &'a C, snapshot: &'a TransferSnapshot) -> Self {
        Self { codec, snapshot }
    }

    /// Decode one component.
    pub fn get<T: Transferable>(&self) -> Result<T, TransferError> {
        let bytes = self
            .find(T::NAME)
            .ok_or(TransferError::MissingComponent(T::NAME))?;
        Ok(self.codec.decode(bytes)?)
    }

    /// Decode one component if it was written.
    pub fn try_get<T: Transferable>(&self) -> Result<Option<T>, TransferError> {
        match self.find(T::NAME) {
            Some(bytes) => Ok(Some(self.codec.decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Location key the actor had before the transfer.
    pub fn location(&self) -> (LocationType, u64) {
        (self.snapshot.location_type, self.snapshot.location_id)
    }

    fn find(&self, name: &str) -> Option<&'a [u8]> {
        self.snapshot
            .components
            .iter()
            .find(|(component, _)| component == name)
            .map(|(_, bytes)| bytes.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Health(u32);

    impl Transferable for Health {
        const NAME: &'static str = "health";
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Buffs(Vec<String>);

    impl Transferable for Buffs {
        const NAME: &'static str = "buffs";
    }

    #[test]
    fn test_components_survive_snapshot() {
        let codec = JsonCodec;
        let mut writer = SnapshotWriter::new(&codec);
        writer.put(&Health(10)).expect("put");
        writer.put(&Health(80)).expect("overwrite");
        let snapshot = writer.finish("unit", LocationType::Unit, 42);
        assert_eq!(snapshot.components.len(), 1);

        let reader = SnapshotReader::new(&codec, &snapshot);
        assert_eq!(reader.get::<Health>().expect("health"), Health(80));
        assert_eq!(reader.location(), (LocationType::Unit, 42));
        assert_eq!(reader.try_get::<Buffs>().expect("optional"), None);
        assert!(matches!(
            reader.get::<Buffs>(),
            Err(TransferError::MissingComponent("buffs"))
        ));
    }
}
