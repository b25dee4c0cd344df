//! The fixed classification taxonomy: 8 roots, ~5 leaves each, declared as
//! a `static` tree (spec.md §3/§4.5) and compiled once at startup into a
//! read-only [`EmbeddedLabel`] table.
//!
//! Mirrors the teacher's `nlu/intent.rs::IntentClassifier::new` shape
//! exactly: declare every template text up front, embed them all in a
//! single batched call, zip the results back onto their labels.

use crate::embedder::Embed;
use crate::types::{EmbeddedLabel, Severity, TaxonomyNode};

macro_rules! leaf {
    ($name:expr, $desc:expr, $sev:expr) => {
        TaxonomyNode {
            name: $name,
            description: $desc,
            severity: Some($sev),
            children: &[],
        }
    };
}

use Severity::*;

static ROOTS: &[TaxonomyNode] = &[
    TaxonomyNode {
        name: "ERROR",
        description: "",
        severity: None,
        children: &[
            leaf!("connection_failure", "network or database connection refused, timed out, or reset", Error),
            leaf!("authentication_failure", "login, token, or credential rejected", Error),
            leaf!("panic", "unrecoverable crash, segfault, or unhandled exception", Error),
            leaf!("resource_exhausted", "out of memory, disk full, or file descriptor limit reached", Error),
            leaf!("dependency_failure", "a downstream service or third-party API returned a failure", Error),
        ],
    },
    TaxonomyNode {
        name: "REQUEST",
        description: "",
        severity: None,
        children: &[
            leaf!("success", "HTTP or RPC request completed with a 2xx status", Info),
            leaf!("client_error", "request rejected due to malformed or invalid client input, 4xx status", Warning),
            leaf!("server_error", "request failed due to a server-side fault, 5xx status", Error),
            leaf!("redirect", "request was redirected, 3xx status", Info),
            leaf!("slow_request", "request completed successfully but exceeded a latency budget", Warning),
        ],
    },
    TaxonomyNode {
        name: "DATABASE",
        description: "",
        severity: None,
        children: &[
            leaf!("query_slow", "a database query exceeded its expected duration", Warning),
            leaf!("query_error", "a database query failed or returned a driver error", Error),
            leaf!("migration", "a schema migration started, completed, or failed", Info),
            leaf!("deadlock", "a transaction was aborted due to a detected deadlock", Error),
            leaf!("connection_pool_exhausted", "no database connections available in the pool", Warning),
        ],
    },
    TaxonomyNode {
        name: "AUTH",
        description: "",
        severity: None,
        children: &[
            leaf!("login_success", "a user or service authenticated successfully", Info),
            leaf!("login_failure", "a login attempt was rejected", Warning),
            leaf!("token_expired", "an access or refresh token expired", Warning),
            leaf!("permission_denied", "an authorized principal was denied by an authorization check", Warning),
            leaf!("mfa_challenge", "a multi-factor authentication challenge was issued or completed", Info),
        ],
    },
    TaxonomyNode {
        name: "DEPLOYMENT",
        description: "",
        severity: None,
        children: &[
            leaf!("deploy_started", "a new deployment or rollout began", Info),
            leaf!("deploy_succeeded", "a deployment completed successfully", Info),
            leaf!("deploy_failed", "a deployment failed or was rolled back", Error),
            leaf!("scaling_event", "an autoscaler added or removed capacity", Info),
            leaf!("config_change", "application or infrastructure configuration was changed", Info),
        ],
    },
    TaxonomyNode {
        name: "SECURITY",
        description: "",
        severity: None,
        children: &[
            leaf!("intrusion_attempt", "a suspected unauthorized access or exploit attempt was detected", Error),
            leaf!("policy_violation", "an action violated a configured security policy", Warning),
            leaf!("certificate_issue", "a TLS certificate expired, was invalid, or failed validation", Warning),
            leaf!("secrets_access", "a secret or credential was read, rotated, or leaked", Info),
            leaf!("firewall_block", "traffic was blocked by a firewall or network policy rule", Warning),
        ],
    },
    TaxonomyNode {
        name: "LIFECYCLE",
        description: "",
        severity: None,
        children: &[
            leaf!("process_start", "a process, container, or service instance started", Info),
            leaf!("process_stop", "a process, container, or service instance stopped cleanly", Info),
            leaf!("health_check", "a liveness or readiness probe reported its status", Debug),
            leaf!("restart", "a process or container was restarted, expectedly or not", Warning),
            leaf!("graceful_shutdown", "a process began or completed a graceful shutdown sequence", Info),
        ],
    },
    TaxonomyNode {
        name: "AUDIT",
        description: "",
        severity: None,
        children: &[
            leaf!("data_access", "a principal read or exported data subject to an audit trail", Info),
            leaf!("data_mutation", "a principal created, updated, or deleted an audited record", Info),
            leaf!("admin_action", "a privileged administrative action was performed", Info),
            leaf!("compliance_event", "an event relevant to a compliance or retention policy occurred", Info),
            leaf!("user_management", "a user, role, or group was created, modified, or removed", Info),
        ],
    },
];

/// The compiled taxonomy: a flat, read-only table of every leaf's
/// embedded label. Owns its [`EmbeddedLabel`] slice; the classifier only
/// ever holds a shared reference.
pub struct Taxonomy {
    labels: Vec<EmbeddedLabel>,
}

impl Taxonomy {
    /// Builds embedding text `"{root}: {leaf.description}"` for every leaf
    /// across every root and embeds them all in one batched call.
    ///
    /// An empty taxonomy (no roots, or roots with no children)
    /// short-circuits and returns zero labels without invoking the
    /// embedder at all (spec.md §4.5).
    pub fn build(embedder: &dyn Embed) -> anyhow::Result<Self> {
        Self::build_from(embedder, ROOTS)
    }

    pub fn build_from(embedder: &dyn Embed, roots: &[TaxonomyNode]) -> anyhow::Result<Self> {
        let mut texts = Vec::new();
        let mut paths = Vec::new();
        let mut severities = Vec::new();

        for root in roots {
            for leaf in root.children {
                texts.push(format!("{}: {}", root.name, leaf.description));
                paths.push(format!("{}.{}", root.name, leaf.name));
                severities.push(leaf.severity.unwrap_or(Severity::Warning));
            }
        }

        if texts.is_empty() {
            return Ok(Self { labels: Vec::new() });
        }

        let embeddings = embedder.embed_batch(&texts)?;
        let labels = paths
            .into_iter()
            .zip(severities)
            .zip(embeddings)
            .map(|((path, severity), embedding)| EmbeddedLabel {
                path,
                severity,
                embedding,
            })
            .collect();

        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[EmbeddedLabel] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_declare_eight_categories_with_leaves() {
        assert_eq!(ROOTS.len(), 8);
        for root in ROOTS {
            assert!(!root.children.is_empty());
            assert!(root.description.is_empty());
            for leaf in root.children {
                assert!(!leaf.description.is_empty());
                assert!(leaf.severity.is_some());
            }
        }
    }

    #[test]
    fn empty_taxonomy_short_circuits_without_embedder() {
        use crate::embedder::test_support::PanicEmbedder;
        let roots: &[TaxonomyNode] = &[];
        let taxonomy = Taxonomy::build_from(&PanicEmbedder, roots).unwrap();
        assert!(taxonomy.labels().is_empty());
    }

    #[test]
    fn taxonomy_labels_cover_every_leaf() {
        use crate::embedder::test_support::FakeEmbedder;
        let embedder = FakeEmbedder::new(8);
        let taxonomy = Taxonomy::build(&embedder).unwrap();
        let expected: usize = ROOTS.iter().map(|r| r.children.len()).sum();
        assert_eq!(taxonomy.labels().len(), expected);
        assert!(taxonomy.labels().iter().any(|l| l.path == "ERROR.connection_failure"));
    }
}
