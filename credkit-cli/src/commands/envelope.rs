use clap::Args;
use credkit_core::sdjwt::{ClaimBody, HashAlgorithm, JwtBody, KeyBindingBody};
use eyre::WrapErr;

/// Arguments for `key-binding`.
#[derive(Args, Debug)]
pub struct KeyBindingArgs {
    /// Verifier-provided nonce.
    #[arg(long)]
    pub nonce: String,

    /// Intended verifier.
    #[arg(long)]
    pub audience: String,

    /// Creation time in epoch seconds.
    #[arg(long)]
    pub iat: u64,

    /// Digest algorithm for the `_sd_hash` claim.
    #[arg(long, default_value = "sha-256", value_parser = parse_algorithm)]
    pub alg: HashAlgorithm,

    /// Issuer-signed JWT and disclosures, exactly as presented.
    #[arg(long)]
    pub presented: String,
}

fn parse_algorithm(value: &str) -> Result<HashAlgorithm, String> {
    HashAlgorithm::from_identifier(value).map_err(|e| e.to_string())
}

/// Decodes an issuer payload and pretty-prints its claims.
pub fn decode_issuer_body(envelope: &str) -> eyre::Result<String> {
    let body = JwtBody::decode(envelope).wrap_err("not an issuer-signed SD-JWT payload")?;
    Ok(serde_json::to_string_pretty(&body.to_claims())?)
}

/// Decodes a key-binding payload and pretty-prints its claims.
pub fn decode_key_binding(envelope: &str) -> eyre::Result<String> {
    let body = KeyBindingBody::decode(envelope).wrap_err("not a key-binding payload")?;
    Ok(serde_json::to_string_pretty(&body.to_claims())?)
}

/// Encodes a key-binding payload whose `_sd_hash` covers `--presented`.
pub fn key_binding(args: &KeyBindingArgs) -> eyre::Result<String> {
    let body = KeyBindingBody::bind(
        args.nonce.as_str(),
        args.audience.as_str(),
        args.iat,
        args.alg,
        &args.presented,
    );
    tracing::debug!(sd_hash = %body.sd_hash, "built key-binding payload");
    Ok(body.encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_binding_decodes_back() {
        let args = KeyBindingArgs {
            nonce: "n1".to_string(),
            audience: "verifier.example".to_string(),
            iat: 1_700_000_100,
            alg: HashAlgorithm::Sha256,
            presented: "a.b.c~".to_string(),
        };
        let envelope = key_binding(&args).expect("encode");
        let printed: serde_json::Value =
            serde_json::from_str(&decode_key_binding(&envelope).expect("decode")).expect("json");
        assert_eq!(printed["nonce"], "n1");
        assert_eq!(printed["aud"], "verifier.example");
        assert_eq!(printed["iat"], 1_700_000_100_u64);
        assert_eq!(printed["_sd_hash"], HashAlgorithm::Sha256.sd_hash("a.b.c~"));
    }

    #[test]
    fn test_issuer_body_missing_vct_is_an_error() {
        let claims = serde_json::json!({"_sd": ["x"], "_sd_alg": "sha-256", "iss": "i"});
        let serde_json::Value::Object(claims) = claims else {
            unreachable!()
        };
        let envelope = credkit_core::sdjwt::envelope::encode(&claims);
        let err = decode_issuer_body(&envelope).expect_err("missing vct");
        assert!(format!("{err:#}").contains("vct"));
    }
}
