use std::path::Path;
use std::sync::Arc;

use clap::Args;
use credkit_core::document::{
    CredentialLoader, Document, DocumentStore, IssuerProof, SimpleDocumentMetadata,
};
use credkit_core::secure_area::{
    CreateKeySettings, SecureAreaRepository, SoftwareSecureArea, SOFTWARE_SECURE_AREA_IDENTIFIER,
};
use credkit_core::storage::{FileStorage, Storage};
use eyre::{eyre, WrapErr};
use serde_json::{json, Value};

use super::parse_hex;

/// Arguments for `provision`.
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Add the credentials to this document instead of creating one.
    #[arg(long)]
    pub document: Option<String>,

    /// Display name for a newly created document.
    #[arg(long)]
    pub name: Option<String>,

    /// Domain the credentials are created in.
    #[arg(long)]
    pub domain: String,

    /// Attestation challenge from the issuer, hex encoded.
    #[arg(long, value_parser = parse_hex)]
    pub challenge: ::std::vec::Vec<u8>,

    /// Number of credentials to create.
    #[arg(long, default_value_t = 1)]
    pub count: usize,

    /// Issuer nonce for an aggregate key attestation (batch only).
    #[arg(long)]
    pub nonce: Option<String>,

    /// Credential this one replaces.
    #[arg(long, conflicts_with = "count")]
    pub replaces: Option<String>,
}

/// Arguments for `certify`.
#[derive(Args, Debug)]
pub struct CertifyArgs {
    /// Pending credential to certify.
    #[arg(long)]
    pub credential: String,

    /// Issuer-provided data, typically the signed SD-JWT.
    #[arg(long)]
    pub issuer_data: String,

    /// Start of validity in epoch seconds.
    #[arg(long)]
    pub valid_from: u64,

    /// End of validity in epoch seconds.
    #[arg(long)]
    pub valid_until: u64,
}

/// Arguments for `show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Document to show. Lists document identifiers when omitted.
    pub document: Option<String>,

    /// Only show the credential that would be used in this domain.
    #[arg(long, requires = "document")]
    pub domain: Option<String>,

    /// Point in time for `--domain`, in epoch seconds.
    #[arg(long, requires = "domain")]
    pub at: Option<u64>,
}

fn open_store(storage_dir: &Path) -> eyre::Result<DocumentStore> {
    let storage: Arc<dyn Storage> = Arc::new(
        FileStorage::new(storage_dir)
            .wrap_err_with(|| format!("cannot open storage at {}", storage_dir.display()))?,
    );
    let repository = SecureAreaRepository::new();
    repository.add(Arc::new(SoftwareSecureArea::new(Arc::clone(&storage))));
    Ok(DocumentStore::new(
        storage,
        repository,
        CredentialLoader::with_builtin_types(),
        SimpleDocumentMetadata::factory(),
    ))
}

fn describe(document: &Document) -> eyre::Result<Value> {
    let display_name = document
        .metadata()
        .as_any()
        .downcast_ref::<SimpleDocumentMetadata>()
        .and_then(SimpleDocumentMetadata::display_name);
    Ok(json!({
        "identifier": document.identifier(),
        "display_name": display_name,
        "credentials": serde_json::to_value(document.credentials())?,
    }))
}

/// Creates Pending credentials bound to software keys.
pub async fn provision(storage_dir: &Path, args: ProvisionArgs) -> eyre::Result<String> {
    eyre::ensure!(args.count > 0, "--count must be at least 1");
    let store = open_store(storage_dir)?;
    let document = match &args.document {
        Some(identifier) => store
            .lookup_document(identifier)?
            .ok_or_else(|| eyre!("no document {identifier}"))?,
        None => {
            let document = store.create_document()?;
            if let Some(simple) = document
                .metadata()
                .as_any()
                .downcast_ref::<SimpleDocumentMetadata>()
            {
                simple.set_display_name(args.name.clone());
                store.save_metadata(&document)?;
            }
            tracing::info!(document = document.identifier(), "created document");
            document
        }
    };

    let mut settings = CreateKeySettings::new(args.challenge);
    if let Some(nonce) = args.nonce {
        settings = settings.with_key_attestation_nonce(nonce);
    }

    let (credentials, key_attestation) = if args.count > 1 {
        let result = store
            .batch_create_credentials(
                &document,
                &args.domain,
                SOFTWARE_SECURE_AREA_IDENTIFIER,
                &settings,
                args.count,
            )
            .await?;
        (
            result.credentials,
            result.key_attestation.map(|attestation| attestation.jws),
        )
    } else {
        let credential = store
            .create_credential(
                &document,
                &args.domain,
                SOFTWARE_SECURE_AREA_IDENTIFIER,
                &settings,
                args.replaces.as_deref(),
            )
            .await?;
        (vec![credential], None)
    };

    Ok(serde_json::to_string_pretty(&json!({
        "document": document.identifier(),
        "credentials": credentials.iter().map(|c| c.identifier.as_str()).collect::<Vec<_>>(),
        "key_attestation": key_attestation,
    }))?)
}

/// Moves a Pending credential to Certified.
pub fn certify(storage_dir: &Path, args: CertifyArgs) -> eyre::Result<String> {
    let store = open_store(storage_dir)?;
    let credential = store
        .lookup_credential(&args.credential)?
        .ok_or_else(|| eyre!("no credential {}", args.credential))?;
    let certified = store.certify(
        &credential,
        IssuerProof::new(
            args.issuer_data.into_bytes(),
            args.valid_from,
            args.valid_until,
        ),
    )?;
    tracing::info!(credential = %certified.identifier, "certified");
    Ok(serde_json::to_string_pretty(&certified)?)
}

/// Lists documents, shows one, or picks its credential for a domain.
pub fn show(storage_dir: &Path, args: ShowArgs) -> eyre::Result<String> {
    let store = open_store(storage_dir)?;
    let Some(identifier) = args.document else {
        return Ok(serde_json::to_string_pretty(&store.list_documents()?)?);
    };
    let document = store
        .lookup_document(&identifier)?
        .ok_or_else(|| eyre!("no document {identifier}"))?;
    let Some(domain) = args.domain else {
        return Ok(serde_json::to_string_pretty(&describe(&document)?)?);
    };
    let now = match args.at {
        Some(at) => at,
        None => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs(),
    };
    let selected = store.find_credential(&document, &domain, now)?;
    Ok(serde_json::to_string_pretty(&selected)?)
}
