//! Webhook signature verification.
//!
//! Meta-convention platforms sign the raw payload bytes with HMAC-SHA-256
//! and supply the digest in an `x-hub-signature-256` style header. The
//! verifier never panics and never errors: any malformed input is an
//! authentication failure for the caller to reject.

use anyhow::{anyhow, bail, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::contract::Platform;

/// Returns true when `signature_header` authenticates `payload` under the
/// platform's shared `secret`.
///
/// Telegram carries no signature channel and always passes. A platform with
/// no configured secret also passes: signing is enforced only where a secret
/// exists to verify against.
pub fn verify_webhook_signature(
    platform: Platform,
    payload: &[u8],
    signature_header: Option<&str>,
    secret: Option<&str>,
) -> bool {
    if platform == Platform::Telegram {
        return true;
    }
    let Some(secret) = secret.map(str::trim).filter(|value| !value.is_empty()) else {
        return true;
    };
    let signature = signature_header.map(str::trim).unwrap_or("");
    verify_sha256_hmac_signature(payload, signature, secret).is_ok()
}

fn verify_sha256_hmac_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<()> {
    let digest_hex = signature_header
        .strip_prefix("sha256=")
        .ok_or_else(|| anyhow!("signature must use sha256=<hex> format"))?;
    let signature_bytes = decode_hex(digest_hex)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .context("failed to initialize hmac verifier")?;
    mac.update(payload);
    // verify_slice is the constant-time comparison path.
    mac.verify_slice(&signature_bytes)
        .map_err(|_| anyhow!("signature verification failed"))
}

fn decode_hex(digest: &str) -> Result<Vec<u8>> {
    let trimmed = digest.trim();
    if trimmed.is_empty() {
        bail!("signature digest cannot be empty");
    }
    if trimmed.len() % 2 != 0 {
        bail!("signature digest must have an even number of hex characters");
    }
    trimmed
        .as_bytes()
        .chunks(2)
        .map(|chunk| {
            let chunk = std::str::from_utf8(chunk).context("signature digest is not utf-8")?;
            u8::from_str_radix(chunk, 16)
                .with_context(|| format!("invalid hex byte '{}' in signature digest", chunk))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use super::verify_webhook_signature;
    use crate::contract::Platform;

    fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac");
        mac.update(payload);
        let digest = mac.finalize().into_bytes();
        let hex = digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        format!("sha256={hex}")
    }

    #[test]
    fn functional_valid_signature_passes() {
        let payload = br#"{"entry":[]}"#;
        let header = sign(payload, "app-secret");
        assert!(verify_webhook_signature(
            Platform::Whatsapp,
            payload,
            Some(&header),
            Some("app-secret"),
        ));
    }

    #[test]
    fn functional_tampered_payload_fails() {
        let payload = br#"{"entry":[]}"#;
        let header = sign(payload, "app-secret");
        assert!(!verify_webhook_signature(
            Platform::Whatsapp,
            br#"{"entry":[{}]}"#,
            Some(&header),
            Some("app-secret"),
        ));
    }

    #[test]
    fn unit_wrong_secret_fails() {
        let payload = b"payload";
        let header = sign(payload, "other-secret");
        assert!(!verify_webhook_signature(
            Platform::Messenger,
            payload,
            Some(&header),
            Some("app-secret"),
        ));
    }

    #[test]
    fn unit_malformed_headers_fail_without_panicking() {
        let payload = b"payload";
        for header in [
            "",
            "sha256=",
            "sha256=zz",
            "sha256=abc",
            "sha1=deadbeef",
            "deadbeef",
        ] {
            assert!(
                !verify_webhook_signature(
                    Platform::Instagram,
                    payload,
                    Some(header),
                    Some("app-secret"),
                ),
                "header '{header}' should fail verification"
            );
        }
        assert!(!verify_webhook_signature(
            Platform::Instagram,
            payload,
            None,
            Some("app-secret"),
        ));
    }

    #[test]
    fn unit_telegram_is_exempt_from_signature_verification() {
        assert!(verify_webhook_signature(
            Platform::Telegram,
            b"anything",
            None,
            Some("unused-secret"),
        ));
    }

    #[test]
    fn regression_missing_secret_skips_enforcement() {
        assert!(verify_webhook_signature(
            Platform::Whatsapp,
            b"payload",
            None,
            None,
        ));
        assert!(verify_webhook_signature(
            Platform::Whatsapp,
            b"payload",
            Some("sha256=deadbeef"),
            Some("   "),
        ));
    }
}
