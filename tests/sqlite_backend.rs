use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use qr_pass::storage::{IdentityDirectory, SqliteStorage, TokenStore};
use qr_pass::{
    ClientMetadata, Identity, IdentityStatus, LogOutcome, PassError, PassServer,
    ValidationOutcome,
};

const T0: i64 = 1_700_000_000;

fn identity() -> Identity {
    Identity {
        id: "E1".to_string(),
        document_number: "987.654.321-00".to_string(),
        name: "Carlos Pereira Lima".to_string(),
        registration: "2021003".to_string(),
        department: "Secretaria de Obras".to_string(),
        role: "Engenheiro".to_string(),
        photo_url: None,
        status: IdentityStatus::Active,
    }
}

fn temp_db(name: &str) -> String {
    let path = std::env::temp_dir().join(format!(
        "qr_pass_{}_{}.db",
        name,
        uuid::Uuid::new_v4().simple()
    ));
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_full_lifecycle_on_sqlite() -> Result<(), PassError> {
    let clock = Arc::new(AtomicI64::new(T0));
    let now = Arc::clone(&clock);

    let storage = Arc::new(SqliteStorage::new(":memory:")?);
    let server = PassServer::builder()
        .with_storage(Arc::clone(&storage))
        .with_time_provider(move || Ok(now.load(Ordering::SeqCst)))
        .build_and_init()
        .await?;
    storage.upsert_identity(&identity()).await?;

    let issued = server.issue("E1").await?;
    clock.store(T0 + 10, Ordering::SeqCst);

    let client = ClientMetadata {
        ip_origin: Some("198.51.100.4".to_string()),
        user_agent: Some("MerchantScanner/2.1".to_string()),
    };
    match server.validate(&issued.token, Some(client.clone())).await? {
        ValidationOutcome::Valid { identity } => {
            assert_eq!(identity.id_masked, "***.654.321-**")
        }
        other => panic!("expected Valid, got {other:?}"),
    }
    assert!(matches!(
        server.validate(&issued.token, None).await?,
        ValidationOutcome::AlreadyUsed { .. }
    ));

    let log = server.recent_validations(10).await?;
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].outcome, LogOutcome::Valid);
    assert_eq!(log[1].client.as_ref(), Some(&client));

    clock.store(T0 + 121, Ordering::SeqCst);
    assert_eq!(server.sweep_expired().await?, 1);
    assert_eq!(server.sweep_expired().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_validation_on_sqlite() -> Result<(), PassError> {
    let storage = Arc::new(SqliteStorage::new(":memory:")?);
    let server = Arc::new(
        PassServer::builder()
            .with_storage(Arc::clone(&storage))
            .build_and_init()
            .await?,
    );
    storage.upsert_identity(&identity()).await?;
    let issued = server.issue("E1").await?;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let server = Arc::clone(&server);
        let token = issued.token.clone();
        handles.push(tokio::spawn(async move {
            server.validate(&token, None).await
        }));
    }

    let mut valid = 0;
    for handle in handles {
        if handle.await.unwrap()?.is_valid() {
            valid += 1;
        }
    }
    assert_eq!(valid, 1);
    Ok(())
}

#[tokio::test]
async fn test_tokens_survive_reopen() -> Result<(), PassError> {
    let path = temp_db("reopen");

    let token = {
        let storage = Arc::new(SqliteStorage::new(&path)?);
        let server = PassServer::builder()
            .with_storage(Arc::clone(&storage))
            .build_and_init()
            .await?;
        storage.upsert_identity(&identity()).await?;
        server.issue("E1").await?.token
    };

    let storage = Arc::new(SqliteStorage::new(&path)?);
    let server = PassServer::builder()
        .with_storage(Arc::clone(&storage))
        .build_and_init()
        .await?;

    assert!(storage.get_token(&token).await?.is_some());
    assert!(server.validate(&token, None).await?.is_valid());

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[tokio::test]
async fn test_seeding_fresh_database_after_init() -> Result<(), PassError> {
    let path = temp_db("seed");

    let storage = Arc::new(SqliteStorage::new(&path)?);
    assert!(matches!(
        storage.upsert_identity(&identity()).await,
        Err(PassError::StorageUnavailable(_))
    ));

    let server = PassServer::builder()
        .with_storage(storage)
        .build_and_init()
        .await?;

    let seed = serde_json::to_string(&vec![identity()]).unwrap();
    let identities: Vec<Identity> = serde_json::from_str(&seed).unwrap();
    for identity in &identities {
        server.storage().upsert_identity(identity).await?;
    }

    let issued = server.issue("E1").await?;
    assert!(server.validate(&issued.token, None).await?.is_valid());

    let _ = std::fs::remove_file(&path);
    Ok(())
}
