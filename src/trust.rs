//! `TrustPolicy` (spec §4.3): a pure mapping from a peer's identity
//! categorization to an admission decision.

use std::collections::HashMap;

/// The reserved display-name prefix that always categorizes as
/// [`PeerCategory::Anonymous`] (spec §4.3, §3 bare-name rules).
pub const ANONYMOUS_PREFIX: &str = "anon";

/// The disjoint, exhaustive categorization of a peer derived from
/// [`IdentityStore`](crate::identity::IdentityStore) state (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerCategory {
    /// Key known, exclusively under this name.
    OnlyMatch,
    /// Key known under this name and others.
    KnownAlias,
    /// Key known under exactly one other name.
    NameChange,
    /// Key known under several other names.
    SharedKey,
    /// Key known under another name, and this name has a different known
    /// key.
    NameCollision,
    /// Key unknown, but the name has a known different key.
    Impersonator,
    /// Key unknown and name unknown.
    Stranger,
    /// The name starts with the reserved [`ANONYMOUS_PREFIX`].
    Anonymous,
}

impl PeerCategory {
    /// Derives a category from the four booleans and other-name count spec
    /// §4.3 defines.
    ///
    /// `name_has_other_key` takes priority over anonymity: an `anon`-prefixed
    /// name impersonating a known key is still a `NameCollision`/
    /// `Impersonator`, never waved through as anonymous.
    #[must_use]
    #[allow(clippy::fn_params_excessive_bools)]
    pub fn classify(
        bare_name: &str,
        has_offered_key: bool,
        key_is_known: bool,
        name_matches_key: bool,
        name_has_other_key: bool,
        other_names_for_key: usize,
    ) -> Self {
        if key_is_known {
            if name_matches_key {
                return if other_names_for_key == 0 {
                    PeerCategory::OnlyMatch
                } else {
                    PeerCategory::KnownAlias
                };
            }
            if name_has_other_key {
                return PeerCategory::NameCollision;
            }
            return if other_names_for_key <= 1 {
                PeerCategory::NameChange
            } else {
                PeerCategory::SharedKey
            };
        }

        if name_has_other_key {
            return PeerCategory::Impersonator;
        }

        if !has_offered_key && bare_name.starts_with(ANONYMOUS_PREFIX) {
            return PeerCategory::Anonymous;
        }

        PeerCategory::Stranger
    }
}

/// Admission decision a [`TrustPolicy`] returns for a [`PeerCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Never establish a session.
    Reject,
    /// Prompt the embedder first; only proceed on assent.
    PromptThenTrust,
    /// Establish the session, then prompt before marking it validated.
    ConnectThenPrompt,
    /// Establish the session and trust it without prompting.
    ConnectAndTrust,
}

/// A complete `PeerCategory -> Admission` mapping.
#[derive(Debug, Clone)]
pub struct TrustPolicy(HashMap<PeerCategory, Admission>);

impl TrustPolicy {
    /// Builds a policy from an explicit, total mapping.
    ///
    /// # Panics
    ///
    /// Panics if `mapping` does not cover every [`PeerCategory`] (spec §4.3
    /// invariant: "a preset is accepted only if every category has a
    /// defined admission level").
    #[must_use]
    pub fn custom(mapping: HashMap<PeerCategory, Admission>) -> Self {
        for category in Self::ALL_CATEGORIES {
            assert!(
                mapping.contains_key(category),
                "TrustPolicy mapping is missing category {:?}",
                category
            );
        }
        Self(mapping)
    }

    const ALL_CATEGORIES: &'static [PeerCategory] = &[
        PeerCategory::OnlyMatch,
        PeerCategory::KnownAlias,
        PeerCategory::NameChange,
        PeerCategory::SharedKey,
        PeerCategory::NameCollision,
        PeerCategory::Impersonator,
        PeerCategory::Stranger,
        PeerCategory::Anonymous,
    ];

    fn from_pairs(pairs: [(PeerCategory, Admission); 8]) -> Self {
        Self(pairs.into_iter().collect())
    }

    /// Trust anything that isn't a name collision or impersonation attempt;
    /// prompt hard on anything adversarial-looking.
    #[must_use]
    pub fn strict() -> Self {
        use Admission::{ConnectAndTrust, ConnectThenPrompt, PromptThenTrust, Reject};
        use PeerCategory::{
            Anonymous, Impersonator, KnownAlias, NameChange, NameCollision, OnlyMatch, SharedKey,
            Stranger,
        };
        Self::from_pairs([
            (OnlyMatch, ConnectAndTrust),
            (KnownAlias, ConnectThenPrompt),
            (NameChange, ConnectThenPrompt),
            (SharedKey, PromptThenTrust),
            (NameCollision, PromptThenTrust),
            (Impersonator, PromptThenTrust),
            (Stranger, ConnectThenPrompt),
            (Anonymous, ConnectThenPrompt),
        ])
    }

    /// Trust known-key categories outright; still prompt on anything that
    /// looks like impersonation.
    #[must_use]
    pub fn moderate() -> Self {
        use Admission::{ConnectAndTrust, ConnectThenPrompt, PromptThenTrust};
        use PeerCategory::{
            Anonymous, Impersonator, KnownAlias, NameChange, NameCollision, OnlyMatch, SharedKey,
            Stranger,
        };
        Self::from_pairs([
            (OnlyMatch, ConnectAndTrust),
            (KnownAlias, ConnectAndTrust),
            (NameChange, ConnectAndTrust),
            (SharedKey, ConnectThenPrompt),
            (NameCollision, PromptThenTrust),
            (Impersonator, PromptThenTrust),
            (Stranger, ConnectAndTrust),
            (Anonymous, ConnectAndTrust),
        ])
    }

    /// Connect and trust everything; only a bare-key impersonation attempt
    /// still gets a prompt.
    #[must_use]
    pub fn lax() -> Self {
        use Admission::{ConnectAndTrust, PromptThenTrust};
        use PeerCategory::{
            Anonymous, Impersonator, KnownAlias, NameChange, NameCollision, OnlyMatch, SharedKey,
            Stranger,
        };
        Self::from_pairs([
            (OnlyMatch, ConnectAndTrust),
            (KnownAlias, ConnectAndTrust),
            (NameChange, ConnectAndTrust),
            (SharedKey, ConnectAndTrust),
            (NameCollision, ConnectAndTrust),
            (Impersonator, PromptThenTrust),
            (Stranger, ConnectAndTrust),
            (Anonymous, ConnectAndTrust),
        ])
    }

    /// Never establish a session with anyone.
    #[must_use]
    pub fn reject_all() -> Self {
        use Admission::Reject;
        use PeerCategory::{
            Anonymous, Impersonator, KnownAlias, NameChange, NameCollision, OnlyMatch, SharedKey,
            Stranger,
        };
        Self::from_pairs([
            (OnlyMatch, Reject),
            (KnownAlias, Reject),
            (NameChange, Reject),
            (SharedKey, Reject),
            (NameCollision, Reject),
            (Impersonator, Reject),
            (Stranger, Reject),
            (Anonymous, Reject),
        ])
    }

    /// Always ask first, regardless of category.
    #[must_use]
    pub fn always_prompt() -> Self {
        use Admission::PromptThenTrust;
        use PeerCategory::{
            Anonymous, Impersonator, KnownAlias, NameChange, NameCollision, OnlyMatch, SharedKey,
            Stranger,
        };
        Self::from_pairs([
            (OnlyMatch, PromptThenTrust),
            (KnownAlias, PromptThenTrust),
            (NameChange, PromptThenTrust),
            (SharedKey, PromptThenTrust),
            (NameCollision, PromptThenTrust),
            (Impersonator, PromptThenTrust),
            (Stranger, PromptThenTrust),
            (Anonymous, PromptThenTrust),
        ])
    }

    /// Connect and trust everything, including impersonation attempts. Named
    /// for what it is; not a sane default.
    #[must_use]
    pub fn unsafe_trust_everyone() -> Self {
        use Admission::ConnectAndTrust;
        use PeerCategory::{
            Anonymous, Impersonator, KnownAlias, NameChange, NameCollision, OnlyMatch, SharedKey,
            Stranger,
        };
        Self::from_pairs([
            (OnlyMatch, ConnectAndTrust),
            (KnownAlias, ConnectAndTrust),
            (NameChange, ConnectAndTrust),
            (SharedKey, ConnectAndTrust),
            (NameCollision, ConnectAndTrust),
            (Impersonator, ConnectAndTrust),
            (Stranger, ConnectAndTrust),
            (Anonymous, ConnectAndTrust),
        ])
    }

    /// The admission decision for `category`.
    ///
    /// # Panics
    ///
    /// Panics if `category` is missing from the mapping, which cannot
    /// happen for a [`TrustPolicy`] built via [`custom`](Self::custom) or
    /// one of the presets.
    #[must_use]
    pub fn admission_for(&self, category: PeerCategory) -> Admission {
        self.0[&category]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_only_match() {
        let category = PeerCategory::classify("bob", true, true, true, false, 0);
        assert_eq!(category, PeerCategory::OnlyMatch);
    }

    #[test]
    fn classify_impersonator() {
        let category = PeerCategory::classify("bob", true, false, false, true, 0);
        assert_eq!(category, PeerCategory::Impersonator);
    }

    #[test]
    fn classify_anonymous_prefix() {
        let category = PeerCategory::classify("anon-42", false, false, false, false, 0);
        assert_eq!(category, PeerCategory::Anonymous);
    }

    #[test]
    fn classify_stranger() {
        let category = PeerCategory::classify("dave", false, false, false, false, 0);
        assert_eq!(category, PeerCategory::Stranger);
    }

    #[test]
    fn presets_cover_every_category() {
        for preset in [
            TrustPolicy::strict(),
            TrustPolicy::moderate(),
            TrustPolicy::lax(),
            TrustPolicy::reject_all(),
            TrustPolicy::always_prompt(),
            TrustPolicy::unsafe_trust_everyone(),
        ] {
            for category in TrustPolicy::ALL_CATEGORIES {
                let _ = preset.admission_for(*category);
            }
        }
    }

    #[test]
    #[should_panic(expected = "missing category")]
    fn custom_rejects_incomplete_mapping() {
        let mut mapping = HashMap::new();
        mapping.insert(PeerCategory::Stranger, Admission::Reject);
        let _ = TrustPolicy::custom(mapping);
    }
}
