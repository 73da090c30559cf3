//! End-to-end loading scenarios over a real extension directory.

use std::collections::BTreeMap;
use std::sync::Arc;

use harbor_bank::{Bank, BankError, Loader};
use harbor_core::{ExtensionType, LoadErrorCode, Origin, Scope, encode_media_id};
use harbor_runtime::provider::BaseExtension;
use harbor_runtime::provider::types::MangaSearchOptions;
use harbor_storage::{KvStore, MemoryKvStore};
use harbor_test::{ExtensionDirFixture, ManifestBuilder, init_test_logging};
use serde_json::json;

struct Host {
    dir: ExtensionDirFixture,
    bank: Arc<Bank>,
    loader: Loader,
}

fn host() -> Host {
    init_test_logging();
    let dir = ExtensionDirFixture::new();
    let bank = Arc::new(Bank::default());
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let loader = Loader::new(dir.path(), Arc::clone(&bank), kv).unwrap();
    Host { dir, bank, loader }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bank_lifecycle() {
    let host = host();
    let mut removed = host.bank.take_removed().unwrap();
    host.dir.write(&ManifestBuilder::provider("gogoanime").build());

    let report = host.loader.load_all().await.unwrap();
    assert_eq!(report.loaded, vec!["gogoanime"]);
    assert!(report.invalid.is_empty());

    let mut entries = Vec::new();
    host.bank.range(|id, ext| {
        entries.push((id.to_string(), ext.origin()));
        true
    });
    assert_eq!(entries, vec![("gogoanime".to_string(), Origin::External)]);
    assert!(removed.try_recv().is_err());

    assert!(host.bank.delete("gogoanime"));
    let mut count = 0;
    host.bank.range(|_, _| {
        count += 1;
        true
    });
    assert_eq!(count, 0);
    assert_eq!(removed.try_recv().unwrap(), "gogoanime");
    assert!(removed.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_typed_provider_roundtrip() {
    let host = host();
    host.dir.write(&ManifestBuilder::provider("echo-manga").build());
    host.loader.load_all().await.unwrap();

    let provider = host.bank.manga_provider("echo-manga").unwrap();
    let results = provider
        .search(MangaSearchOptions {
            query: "naruto".into(),
            year: 0,
        })
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "a");
    assert_eq!(results[0].title, "naruto");

    let ext = host.bank.get("echo-manga").unwrap();
    assert_eq!(ext.extension_type(), Some(ExtensionType::MangaProvider));
    assert!(matches!(host.bank.plugin("echo-manga"), Err(BankError::WrongType { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failures_are_recorded_not_fatal() {
    let host = host();
    host.dir.write_raw("broken.json", "{ not json");
    host.dir.write(&ManifestBuilder::provider("1-starts-with-digit").build());
    host.dir.write(&ManifestBuilder::provider("bad-syntax").payload("class Provider {").build());
    host.dir.write(&ManifestBuilder::provider("no-class").payload("const x = 1;").build());
    host.dir.write(&ManifestBuilder::provider("needs-config").requires_config(1).build());
    host.dir.write(&ManifestBuilder::provider("good-one").build());

    let report = host.loader.load_all().await.unwrap();
    assert_eq!(report.loaded, vec!["good-one"]);

    let code = |id: &str| host.loader.invalid(id).map(|i| i.code);
    assert_eq!(code("broken"), Some(LoadErrorCode::MissingFields));
    assert_eq!(code("1-starts-with-digit"), Some(LoadErrorCode::InvalidId));
    assert_eq!(code("bad-syntax"), Some(LoadErrorCode::CompilationError));
    assert_eq!(code("no-class"), Some(LoadErrorCode::ConstructorError));
    assert_eq!(code("needs-config"), Some(LoadErrorCode::UserConfigError));
    assert_eq!(report.invalid.len(), 5);
    assert_eq!(host.bank.ids(), vec!["good-one"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plugin_permissions_gate_loading() {
    let host = host();
    let manifest = ManifestBuilder::plugin("perm-plugin").scopes([Scope::Storage]).build();
    host.dir.write(&manifest);

    host.loader.load_all().await.unwrap();
    assert_eq!(
        host.loader.invalid("perm-plugin").unwrap().code,
        LoadErrorCode::PermissionsNotGranted
    );
    assert!(host.bank.get("perm-plugin").is_none());

    let hash = host.loader.grant_permissions("perm-plugin").await.unwrap();
    assert_eq!(hash, harbor_core::permission_hash(manifest.permissions.as_ref().unwrap()));
    assert!(host.bank.plugin("perm-plugin").is_ok());
    assert!(host.loader.invalid("perm-plugin").is_none());

    // Asking for more than was granted invalidates the grant.
    host.dir
        .write(&ManifestBuilder::plugin("perm-plugin").scopes([Scope::Storage, Scope::System]).build());
    let err = host.loader.reload("perm-plugin").await.unwrap_err();
    assert!(matches!(
        err,
        BankError::Invalid {
            code: LoadErrorCode::PermissionsNotGranted,
            ..
        }
    ));
    assert!(host.bank.get("perm-plugin").is_none());
    assert!(host.loader.hub().plugin("perm-plugin").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plugin_without_permissions_loads() {
    let host = host();
    host.dir.write(&ManifestBuilder::plugin("idle-plugin").build());
    let report = host.loader.load_all().await.unwrap();
    assert_eq!(report.loaded, vec!["idle-plugin"]);
    assert!(host.loader.hub().plugin("idle-plugin").is_some());

    assert!(host.loader.unload("idle-plugin").await.unwrap());
    assert!(host.loader.hub().plugin("idle-plugin").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_user_config_substitution_and_versions() {
    let host = host();
    let payload = r#"class Provider { async search(o) { return [{ id: "{{apiUrl}}", title: o.query }]; } }"#;
    host.dir.write(
        &ManifestBuilder::provider("configured")
            .payload(payload)
            .config_field("apiUrl", "https://default.example")
            .build(),
    );
    host.loader.load_all().await.unwrap();

    let search = |bank: &Bank| {
        let provider = bank.manga_provider("configured").unwrap();
        async move {
            provider
                .search(MangaSearchOptions {
                    query: "q".into(),
                    year: 0,
                })
                .await
                .unwrap()
        }
    };
    assert_eq!(search(&host.bank).await[0].id, "https://default.example");

    let values = BTreeMap::from([("apiUrl".to_string(), "https://mine.example".to_string())]);
    let saved = host.loader.save_user_config("configured", &values).await.unwrap();
    assert_eq!(saved.version, 1);
    assert_eq!(search(&host.bank).await[0].id, "https://mine.example");

    // A schema bump makes the saved values incompatible.
    let mut bumped = ManifestBuilder::provider("configured")
        .payload(payload)
        .config_field("apiUrl", "https://default.example")
        .build();
    if let Some(schema) = bumped.user_config.as_mut() {
        schema.version = 2;
    }
    host.dir.write(&bumped);
    assert!(host.loader.reload("configured").await.is_err());
    assert_eq!(
        host.loader.invalid("configured").unwrap().code,
        LoadErrorCode::IncompatibleUserConfig
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_install_and_uninstall() {
    let host = host();
    let manifest = ManifestBuilder::provider("installed-src").build();
    host.loader.install(&manifest).await.unwrap();
    assert!(host.dir.contains("installed-src.json"));
    assert!(host.bank.contains("installed-src"));

    host.loader.uninstall("installed-src").await.unwrap();
    assert!(!host.dir.contains("installed-src.json"));
    assert!(!host.bank.contains("installed-src"));
    assert!(matches!(
        host.loader.uninstall("installed-src").await,
        Err(BankError::NotFound(_))
    ));

    let reserved = ManifestBuilder::provider("anilist").build();
    assert!(host.loader.install(&reserved).await.is_err());
    assert!(!host.dir.contains("anilist.json"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_custom_source_identifiers() {
    let host = host();
    host.dir.write(&ManifestBuilder::custom_source("source-a").build());
    host.dir.write(&ManifestBuilder::custom_source("source-b").build());
    host.loader.load_all().await.unwrap();

    let a = host.bank.custom_source("source-a").unwrap().extension_identifier();
    let b = host.bank.custom_source("source-b").unwrap().extension_identifier();
    assert_eq!((a, b), (1, 2));

    host.loader.reload("source-a").await.unwrap();
    assert_eq!(host.bank.custom_source("source-a").unwrap().extension_identifier(), 1);

    let media = encode_media_id(2, 42).unwrap();
    let (owner, local) = host.bank.custom_source_for_media(media).unwrap();
    assert_eq!(owner.extension_identifier(), 2);
    assert_eq!(local, 42);

    let settings = owner.get_settings().await.unwrap();
    assert!(settings.supports_anime);

    host.loader.uninstall("source-a").await.unwrap();
    host.dir.write(&ManifestBuilder::custom_source("source-c").build());
    host.loader.load_file(&host.dir.path().join("source-c.json")).await.unwrap();
    assert_eq!(host.bank.custom_source("source-c").unwrap().extension_identifier(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_raw_bridge_call() {
    let host = host();
    host.dir.write(&ManifestBuilder::provider("raw-src").build());
    host.loader.load_all().await.unwrap();
    let ext = host.bank.get("raw-src").unwrap();
    let value = ext
        .bridge()
        .unwrap()
        .call_raw("search", vec![json!("naruto")])
        .await
        .unwrap();
    assert_eq!(value, json!([{ "id": "a", "title": "naruto" }]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unload_all_keeps_builtins() {
    let host = host();
    host.dir.write(&ManifestBuilder::provider("external-src").build());
    host.loader.load_all().await.unwrap();

    let echo = host.bank.get("external-src").unwrap();
    let handle = echo.handle().clone();
    let mut builtin = ManifestBuilder::new("builtin-src", ExtensionType::MangaProvider, "").build();
    builtin.language = Some(harbor_core::Language::Go);
    host.loader.register_builtin(builtin, handle).await.unwrap();
    assert!(host.loader.is_builtin("builtin-src"));
    assert!(host.bank.get("builtin-src").unwrap().is_builtin());

    host.loader.reload("builtin-src").await.unwrap();
    assert!(host.bank.contains("builtin-src"));

    // A built-in id cannot be taken by a manifest.
    host.dir.write(&ManifestBuilder::provider("builtin-src").build());
    let err = host
        .loader
        .load_file(&host.dir.path().join("builtin-src.json"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BankError::Invalid {
            code: LoadErrorCode::InvalidId,
            ..
        }
    ));

    host.loader.unload_all().await.unwrap();
    assert_eq!(host.bank.ids(), vec!["builtin-src"]);
}
