//! Authorization middleware.
//!
//! Innermost layer: the domain service only runs once the operation has
//! passed the check named by its [`AccessRequirement`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use qserver_core::QError;

use crate::service::operation::{AccessRequirement, Operation, OperationResponse};

/// Tower layer enforcing the access requirement of each operation.
#[derive(Debug, Clone)]
pub struct AccessLayer;

impl<S> Layer<S> for AccessLayer {
    type Service = AccessService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct AccessService<S> {
    inner: S,
}

impl<S> Service<Operation> for AccessService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = QError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = QError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, QError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut op: Operation) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let ctx = op.ctx().clone();
            match op.access() {
                AccessRequirement::Granted => {
                    let rights = ctx.require_granted_access(op.args()).await?;
                    op.set_rights(rights);
                }
                AccessRequirement::Mam => ctx.mam_access_required(op.args())?,
                AccessRequirement::None => {}
            }
            inner.call(op).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;
    use tower::{service_fn, ServiceExt};

    use super::*;
    use crate::service::middleware::tests::{op, op_on};
    use crate::test_support::granting_auth_stub;

    fn counting() -> (
        Arc<AtomicUsize>,
        impl Service<Operation, Response = OperationResponse, Error = QError, Future: Send> + Clone + Send + 'static,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let svc = service_fn(move |op: Operation| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, QError>(json!({"granted": op.rights().map(|r| r.granted)}))
            }
        });
        (calls, svc)
    }

    #[tokio::test]
    async fn granted_access_attaches_rights() {
        let (calls, inner) = counting();
        let svc = AccessLayer.layer(inner);
        let resp = svc
            .oneshot(op("blocks", json!({"accessKey": "k1"})))
            .await
            .unwrap();
        assert_eq!(resp["granted"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_access_never_reaches_domain() {
        let stub = granting_auth_stub(&["good"]).await;
        let (calls, inner) = counting();
        let svc = AccessLayer.layer(inner);
        let err = svc
            .oneshot(op_on(&stub.endpoint(), "blocks", json!({"accessKey": "bad"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, 401);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn payload_with_both_key_spellings_is_authorized() {
        let stub = granting_auth_stub(&["k1"]).await;
        let (calls, inner) = counting();
        let svc = AccessLayer.layer(inner);
        let payload = json!({"accessKey": "k1", "accesskey": "k1"});
        let resp = svc
            .oneshot(op_on(&stub.endpoint(), "blocks", payload))
            .await
            .unwrap();
        assert_eq!(resp["granted"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.requests()[0]["params"]["accessKey"], "k1");
    }

    #[tokio::test]
    async fn mam_and_open_requirements() {
        let (calls, inner) = counting();
        let svc = AccessLayer.layer(inner);

        let mam = op("stats", json!({"accessKey": "mam"})).with_access(AccessRequirement::Mam);
        svc.clone().oneshot(mam).await.unwrap();

        let denied = op("stats", json!({})).with_access(AccessRequirement::Mam);
        assert_eq!(svc.clone().oneshot(denied).await.unwrap_err().code, 401);

        let open = op("info", json!({})).with_access(AccessRequirement::None);
        let resp = svc.oneshot(open).await.unwrap();
        assert_eq!(resp["granted"], serde_json::Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
