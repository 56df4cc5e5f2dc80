//! Per-host gating predicates.
//!
//! A task runs its action on a host only when every predicate in its
//! [`PrepareCollection`] returns `true` for that host. Returning `false` is a
//! routine skip; returning `Err` means the check itself could not be made and
//! fails the task.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::{KubestepError, Result};
use crate::inventory::{Host, MASTER};
use crate::runtime::Runtime;

/// Last path segment of a type name, e.g. `OnlyFirst` for
/// `kubestep_core::prepare::OnlyFirst`.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ---------------------------------------------------------------------------
// Prepare
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Prepare: Send + Sync {
    fn name(&self) -> String {
        short_type_name::<Self>().to_string()
    }

    /// Decide whether the owning task should run on `host`. May read remote
    /// state, must never change it.
    async fn evaluate(&self, host: &Host, runtime: &Runtime) -> Result<bool>;
}

/// Attach the predicate name and host to an error raised while evaluating.
fn as_prepare_error(name: String, host: &Host, err: KubestepError) -> KubestepError {
    match err {
        e @ KubestepError::PrepareEvaluation { .. } => e,
        other => KubestepError::PrepareEvaluation {
            prepare: name,
            host: host.name.clone(),
            message: other.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// PrepareCollection
// ---------------------------------------------------------------------------

/// AND of its members, evaluated in declaration order. An empty collection
/// always passes. Cloning shares the predicates.
#[derive(Default, Clone)]
pub struct PrepareCollection {
    items: Vec<Arc<dyn Prepare>>,
}

impl PrepareCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, prepare: impl Prepare + 'static) -> Self {
        self.push(prepare);
        self
    }

    pub fn push(&mut self, prepare: impl Prepare + 'static) {
        self.items.push(Arc::new(prepare));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|p| p.name()).collect()
    }
}

impl fmt::Debug for PrepareCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[async_trait]
impl Prepare for PrepareCollection {
    fn name(&self) -> String {
        format!("All({})", self.names().join(", "))
    }

    async fn evaluate(&self, host: &Host, runtime: &Runtime) -> Result<bool> {
        for prepare in &self.items {
            let pass = prepare
                .evaluate(host, runtime)
                .await
                .map_err(|e| as_prepare_error(prepare.name(), host, e))?;
            if !pass {
                tracing::debug!(host = %host.name, prepare = %prepare.name(), "prepare returned false");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Not
// ---------------------------------------------------------------------------

/// Inverts the wrapped predicate's answer. Errors pass through untouched.
pub struct Not<P>(pub P);

#[async_trait]
impl<P: Prepare> Prepare for Not<P> {
    fn name(&self) -> String {
        format!("Not({})", self.0.name())
    }

    async fn evaluate(&self, host: &Host, runtime: &Runtime) -> Result<bool> {
        Ok(!self.0.evaluate(host, runtime).await?)
    }
}

// ---------------------------------------------------------------------------
// Built-in predicates
// ---------------------------------------------------------------------------

/// True only on the first host declared with `role`.
#[derive(Debug, Clone)]
pub struct OnlyFirst(pub String);

impl OnlyFirst {
    pub fn role(role: impl Into<String>) -> Self {
        Self(role.into())
    }
}

#[async_trait]
impl Prepare for OnlyFirst {
    fn name(&self) -> String {
        format!("OnlyFirst({})", self.0)
    }

    async fn evaluate(&self, host: &Host, runtime: &Runtime) -> Result<bool> {
        Ok(runtime
            .inventory()
            .first_of(&self.0)
            .map(|first| first.name == host.name)
            .unwrap_or(false))
    }
}

/// Shorthand for `OnlyFirst("master")`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnlyFirstMaster;

#[async_trait]
impl Prepare for OnlyFirstMaster {
    async fn evaluate(&self, host: &Host, runtime: &Runtime) -> Result<bool> {
        OnlyFirst::role(MASTER).evaluate(host, runtime).await
    }
}

#[derive(Debug, Clone)]
pub struct HasRole(pub String);

#[async_trait]
impl Prepare for HasRole {
    fn name(&self) -> String {
        format!("HasRole({})", self.0)
    }

    async fn evaluate(&self, host: &Host, _runtime: &Runtime) -> Result<bool> {
        Ok(host.has_role(&self.0))
    }
}

/// Constant answer.
#[derive(Debug, Clone, Copy)]
pub struct Always(pub bool);

#[async_trait]
impl Prepare for Always {
    fn name(&self) -> String {
        format!("Always({})", self.0)
    }

    async fn evaluate(&self, _host: &Host, _runtime: &Runtime) -> Result<bool> {
        Ok(self.0)
    }
}

/// Adapts a synchronous closure, for checks that only need local state such
/// as cluster configuration flags.
pub struct FnPrepare<F> {
    name: String,
    f: F,
}

impl<F> FnPrepare<F>
where
    F: Fn(&Host, &Runtime) -> Result<bool> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Prepare for FnPrepare<F>
where
    F: Fn(&Host, &Runtime) -> Result<bool> + Send + Sync,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn evaluate(&self, host: &Host, runtime: &Runtime) -> Result<bool> {
        (self.f)(host, runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::connector::RecordingConnector;
    use crate::inventory::{Inventory, WORKER};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn runtime() -> Runtime {
        Runtime::new(
            Inventory::new(vec![
                Host::new("node1").with_role(MASTER),
                Host::new("node2").with_role(MASTER).with_role(WORKER),
            ]),
            Arc::new(RecordingConnector::new()),
            ClusterConfig::default(),
        )
    }

    struct Counting {
        answer: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Prepare for Counting {
        async fn evaluate(&self, _host: &Host, _runtime: &Runtime) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Prepare for Unreachable {
        async fn evaluate(&self, _host: &Host, _runtime: &Runtime) -> Result<bool> {
            Err(KubestepError::Connector("connection refused".into()))
        }
    }

    async fn eval(p: &dyn Prepare, host: &str) -> Result<bool> {
        let rt = runtime();
        let host = rt.inventory().get(host).unwrap().clone();
        p.evaluate(&host, &rt).await
    }

    #[tokio::test]
    async fn chain_is_true_iff_every_member_is_true() {
        for bits in 0u8..8 {
            let answers = [bits & 1 != 0, bits & 2 != 0, bits & 4 != 0];
            let mut chain = PrepareCollection::new();
            for a in answers {
                chain.push(Always(a));
            }
            let expected = answers.iter().all(|a| *a);
            assert_eq!(eval(&chain, "node1").await.unwrap(), expected, "{answers:?}");
        }
    }

    #[tokio::test]
    async fn not_flips_only_its_own_member() {
        // [true, false] -> false; [true, Not(false)] -> true
        let plain = PrepareCollection::new().with(Always(true)).with(Always(false));
        let negated = PrepareCollection::new()
            .with(Always(true))
            .with(Not(Always(false)));
        assert!(!eval(&plain, "node1").await.unwrap());
        assert!(eval(&negated, "node1").await.unwrap());
    }

    #[tokio::test]
    async fn chain_short_circuits_on_first_false() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = PrepareCollection::new()
            .with(Always(false))
            .with(Counting {
                answer: true,
                calls: Arc::clone(&calls),
            });
        assert!(!eval(&chain, "node1").await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_chain_passes() {
        assert!(eval(&PrepareCollection::new(), "node2").await.unwrap());
    }

    #[tokio::test]
    async fn failure_is_an_error_not_a_skip() {
        let chain = PrepareCollection::new().with(Not(Unreachable));
        let err = eval(&chain, "node2").await.unwrap_err();
        match err {
            KubestepError::PrepareEvaluation {
                prepare,
                host,
                message,
            } => {
                assert_eq!(prepare, "Not(Unreachable)");
                assert_eq!(host, "node2");
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected PrepareEvaluation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn only_first_master_selects_declaration_order_head() {
        assert!(eval(&OnlyFirstMaster, "node1").await.unwrap());
        assert!(!eval(&OnlyFirstMaster, "node2").await.unwrap());
        assert!(eval(&OnlyFirst::role(WORKER), "node2").await.unwrap());
        assert!(!eval(&OnlyFirst::role("ingress"), "node1").await.unwrap());
    }

    #[tokio::test]
    async fn fn_prepare_reads_cluster_config() {
        let p = FnPrepare::new("EnableNodeLocalDNS", |_, rt: &Runtime| {
            Ok(rt.cluster().kubernetes.enable_nodelocaldns)
        });
        assert_eq!(p.name(), "EnableNodeLocalDNS");
        assert!(eval(&p, "node1").await.unwrap());
        assert!(eval(&HasRole(WORKER.into()), "node2").await.unwrap());
    }

    #[test]
    fn names_are_readable() {
        assert_eq!(OnlyFirstMaster.name(), "OnlyFirstMaster");
        let chain = PrepareCollection::new()
            .with(OnlyFirstMaster)
            .with(Not(HasRole("etcd".into())));
        assert_eq!(chain.name(), "All(OnlyFirstMaster, Not(HasRole(etcd)))");
    }
}
