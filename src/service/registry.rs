//! Method registry and the descriptor contract consumed from generated stubs.
//!
//! A stub generator describes each service as a static [`ServiceDesc`]: one
//! [`MethodDesc`] per unary method, each pointing at a byte-in/byte-out
//! handler. Registration closes every handler over the owning service
//! instance and stores it under the method name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use prost::Message;

use crate::codec;
use crate::context::CallContext;
use crate::error::{Error, Result};

/// Future returned by a raw method handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Bytes>>;

/// A registered handler, already bound to its service instance.
pub type Handler = Arc<dyn Fn(CallContext, Bytes) -> HandlerFuture + Send + Sync>;

/// One unary method of a service.
pub struct MethodDesc<S: ?Sized> {
    pub name: &'static str,
    pub handler: fn(Arc<S>, CallContext, Bytes) -> HandlerFuture,
}

/// Static description of a service, as emitted by the stub generator.
pub struct ServiceDesc<S: ?Sized + 'static> {
    /// Fully-qualified service name, conventionally the queue it serves on
    pub service_name: &'static str,
    pub methods: &'static [MethodDesc<S>],
}

/// Decode the request, run a typed handler, encode its response.
///
/// Generated server stubs are thin wrappers around this.
pub fn unary<S, Req, Resp, F, Fut>(service: Arc<S>, ctx: CallContext, body: Bytes, call: F) -> HandlerFuture
where
    S: ?Sized + Send + Sync + 'static,
    Req: Message + Default + 'static,
    Resp: Message + 'static,
    F: FnOnce(Arc<S>, CallContext, Req) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
{
    Box::pin(async move {
        let request: Req = codec::decode(&body)?;
        let response = call(service, ctx, request).await?;
        Ok(codec::encode(&response)?)
    })
}

/// Method name to handler table. Written at startup, read by every worker.
#[derive(Default)]
pub(crate) struct MethodRegistry {
    methods: RwLock<HashMap<String, Handler>>,
}

impl MethodRegistry {
    pub(crate) fn insert(&self, name: String, handler: Handler) -> Result<()> {
        let mut methods = self.methods.write();
        if methods.contains_key(&name) {
            return Err(Error::DuplicateMethod(name));
        }
        methods.insert(name, handler);
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Handler> {
        self.methods.read().get(name).cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Text {
        #[prost(string, tag = "1")]
        data: String,
    }

    struct Upper;

    impl Upper {
        async fn shout(&self, _ctx: CallContext, request: Text) -> anyhow::Result<Text> {
            Ok(Text {
                data: request.data.to_uppercase(),
            })
        }
    }

    fn shout_handler(service: Arc<Upper>, ctx: CallContext, body: Bytes) -> HandlerFuture {
        unary(service, ctx, body, |service, ctx, request: Text| async move {
            service.shout(ctx, request).await
        })
    }

    fn bind(handler: fn(Arc<Upper>, CallContext, Bytes) -> HandlerFuture) -> Handler {
        let service = Arc::new(Upper);
        Arc::new(move |ctx: CallContext, body: Bytes| handler(Arc::clone(&service), ctx, body))
    }

    #[tokio::test]
    async fn test_unary_decodes_and_encodes() {
        let body = codec::encode(&Text { data: "hi".into() }).unwrap();
        let out = shout_handler(Arc::new(Upper), CallContext::new(), body)
            .await
            .unwrap();
        let text: Text = codec::decode(&out).unwrap();
        assert_eq!(text.data, "HI");
    }

    #[tokio::test]
    async fn test_unary_rejects_malformed_body() {
        let result = shout_handler(Arc::new(Upper), CallContext::new(), Bytes::from_static(&[0xff, 0xff])).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let registry = MethodRegistry::default();
        registry.insert("Shout".into(), bind(shout_handler)).unwrap();
        let err = registry.insert("Shout".into(), bind(shout_handler)).unwrap_err();
        assert!(matches!(err, Error::DuplicateMethod(name) if name == "Shout"));
        assert!(registry.contains("Shout"));
        assert_eq!(registry.names(), vec!["Shout".to_string()]);
    }
}
