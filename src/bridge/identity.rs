use libp2p::identity;
use libp2p::PeerId;
use std::fs;
use std::path::Path;

/// Load or generate this instance's Ed25519 mesh identity keypair.
///
/// The keypair is stored as a 32-byte Ed25519 seed at
/// `{data_dir}/instance_identity.key` so an instance keeps a stable peer id
/// across restarts. This is infrastructure identity only — it has nothing to
/// do with user identities, which the identity service owns.
pub fn instance_keypair(data_dir: &str) -> identity::Keypair {
    let key_path = Path::new(data_dir).join("instance_identity.key");

    if key_path.exists() {
        let seed_bytes = fs::read(&key_path).expect("Failed to read instance_identity.key");
        assert!(
            seed_bytes.len() == 32,
            "instance_identity.key must be a 32-byte Ed25519 seed, found {} bytes",
            seed_bytes.len()
        );
        let mut seed = seed_bytes.clone();
        let ed25519_keypair = identity::ed25519::Keypair::try_from_bytes(&mut seed)
            .expect("Invalid Ed25519 seed in instance_identity.key");
        let keypair = identity::Keypair::from(ed25519_keypair);
        tracing::info!(
            "Instance peer id: {} (loaded from {})",
            PeerId::from(keypair.public()),
            key_path.display()
        );
        keypair
    } else {
        let keypair = identity::Keypair::generate_ed25519();

        // ed25519::Keypair::to_bytes() yields 64 bytes (seed + public);
        // only the first 32 (the seed) need persisting.
        let ed25519_kp = keypair
            .clone()
            .try_into_ed25519()
            .expect("Keypair is Ed25519");
        let full_bytes = ed25519_kp.to_bytes();

        fs::create_dir_all(data_dir).expect("Failed to create data directory");
        fs::write(&key_path, &full_bytes[..32]).expect("Failed to write instance_identity.key");
        tracing::info!(
            "Instance peer id: {} (generated, saved to {})",
            PeerId::from(keypair.public()),
            key_path.display()
        );
        keypair
    }
}
