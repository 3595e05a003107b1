//! Deal Signatures
//!
//! A signature is HMAC-SHA256 over the exact current terms, the signer's
//! user id and both payout addresses. Any change to those makes a stored
//! signature stale.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::types::{Deal, DealError, DealTerms, Party};

type HmacSha256 = Hmac<Sha256>;

/// Deterministic deal signer
#[derive(Clone)]
pub struct DealSigner {
    keyed: HmacSha256,
}

impl std::fmt::Debug for DealSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DealSigner").finish_non_exhaustive()
    }
}

impl DealSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, DealError> {
        let keyed = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|e| DealError::Signing(e.to_string()))?;
        Ok(Self { keyed })
    }

    /// Hex signature over terms, signer and both payout addresses
    pub fn sign(
        &self,
        terms: &DealTerms,
        signer_user_id: i64,
        lessor_payout: &str,
        lessee_payout: &str,
    ) -> String {
        let duration = terms.duration_hours.to_be_bytes();
        let price = terms.price_nano.to_be_bytes();
        let signer = signer_user_id.to_be_bytes();
        let fields: [&[u8]; 7] = [
            terms.deal_type.as_bytes(),
            &duration,
            &price,
            terms.details.as_bytes(),
            &signer,
            lessor_payout.as_bytes(),
            lessee_payout.as_bytes(),
        ];

        let mut mac = self.keyed.clone();
        // Length-prefixed fields so no two inputs share an encoding
        for field in fields {
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field);
        }
        hex::encode(mac.finalize().into_bytes())
    }

    /// Expected signature of `party` for the deal as it stands.
    ///
    /// `None` while either payout address is unset.
    pub fn expected_for(&self, deal: &Deal, party: Party) -> Option<String> {
        let lessor_payout = deal.lessor_payout_address.as_deref()?;
        let lessee_payout = deal.lessee_payout_address.as_deref()?;
        Some(self.sign(&deal.terms, deal.user_of(party), lessor_payout, lessee_payout))
    }

    /// Both stored signatures match the current terms
    pub fn is_fully_signed(&self, deal: &Deal) -> bool {
        [Party::Lessor, Party::Lessee].into_iter().all(|party| {
            match (deal.signature(party), self.expected_for(deal, party)) {
                (Some(stored), Some(expected)) => stored == expected,
                _ => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms() -> DealTerms {
        DealTerms {
            deal_type: "post".to_string(),
            duration_hours: 24,
            price_nano: 1_000_000_000,
            details: "pinned for a day".to_string(),
        }
    }

    #[test]
    fn test_signature_is_deterministic() {
        let signer = DealSigner::new("secret").unwrap();
        let a = signer.sign(&terms(), 1, "0:aa", "0:bb");
        let b = signer.sign(&terms(), 1, "0:aa", "0:bb");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_signature_binds_every_input() {
        let signer = DealSigner::new("secret").unwrap();
        let base = signer.sign(&terms(), 1, "0:aa", "0:bb");

        let mut repriced = terms();
        repriced.price_nano += 1;
        assert_ne!(base, signer.sign(&repriced, 1, "0:aa", "0:bb"));
        assert_ne!(base, signer.sign(&terms(), 2, "0:aa", "0:bb"));
        assert_ne!(base, signer.sign(&terms(), 1, "0:aa", "0:bc"));
        assert_ne!(base, signer.sign(&terms(), 1, "0:bb", "0:aa"));
        assert_ne!(base, DealSigner::new("other").unwrap().sign(&terms(), 1, "0:aa", "0:bb"));
    }

    #[test]
    fn test_field_boundaries_matter() {
        let signer = DealSigner::new("secret").unwrap();
        let mut a = terms();
        a.deal_type = "po".to_string();
        a.details = "stpinned".to_string();
        let mut b = terms();
        b.deal_type = "post".to_string();
        b.details = "pinned".to_string();
        assert_ne!(signer.sign(&a, 1, "x", "y"), signer.sign(&b, 1, "x", "y"));
    }
}
