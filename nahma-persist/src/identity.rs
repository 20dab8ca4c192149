//! Identity blob storage: keypair + profile, encrypted at rest.

use crate::error::PersistError;
use crate::keys::MachineKey;
use nahma_model::{Identity, Keypair};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    secret: [u8; 32],
    created_at: u64,
    profile_version: u64,
    display_name: String,
    color: String,
    icon: String,
}

const IDENTITY_KEY: &[u8] = b"local";

/// Loads the local identity, if one has been persisted.
pub fn load_identity(
    identities: &sled::Tree,
    machine_key: &MachineKey,
) -> Result<Option<Identity>, PersistError> {
    let Some(blob) = identities.get(IDENTITY_KEY)? else {
        return Ok(None);
    };
    let plaintext = machine_key.decrypt(&blob)?;
    let record: IdentityRecord = bincode::deserialize(&plaintext)?;
    let keypair = Keypair::from_secret_bytes(record.secret);
    Ok(Some(Identity::from_parts(
        keypair,
        record.created_at,
        record.profile_version,
        record.display_name,
        record.color,
        record.icon,
    )))
}

/// Persists the local identity, overwriting any previous one, flushed
/// before returning.
pub fn store_identity(
    identities: &sled::Tree,
    machine_key: &MachineKey,
    identity: &Identity,
) -> Result<(), PersistError> {
    let record = IdentityRecord {
        secret: identity.keypair().to_secret_bytes(),
        created_at: identity.created_at,
        profile_version: identity.profile_version,
        display_name: identity.display_name.clone(),
        color: identity.color.clone(),
        icon: identity.icon.clone(),
    };
    let plaintext = bincode::serialize(&record)?;
    let blob = machine_key.encrypt(&plaintext)?;
    identities.insert(IDENTITY_KEY, blob)?;
    identities.flush()?;
    Ok(())
}

/// Removes the local identity blob entirely.
pub fn delete_identity(identities: &sled::Tree) -> Result<(), PersistError> {
    identities.remove(IDENTITY_KEY)?;
    identities.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips_through_encrypted_storage() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let tree = db.open_tree("identity").unwrap();
        let machine_key = MachineKey::load_or_create(dir.path()).unwrap();

        let identity = Identity::generate("ada", 12345);
        let peer_before = identity.peer_id();
        store_identity(&tree, &machine_key, &identity).unwrap();

        let loaded = load_identity(&tree, &machine_key).unwrap().unwrap();
        assert_eq!(loaded.peer_id(), peer_before);
        assert_eq!(loaded.display_name, "ada");
    }

    #[test]
    fn missing_identity_loads_as_none() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let tree = db.open_tree("identity").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let machine_key = MachineKey::load_or_create(dir.path()).unwrap();
        assert!(load_identity(&tree, &machine_key).unwrap().is_none());
    }
}
