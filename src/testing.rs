//! The built-in `urn:weaver-proxy:unit-test` handler.
//!
//! Compiled into the engine so the test suite — and a C caller driving the
//! FFI boundary directly — can exercise every filter behaviour without a
//! dynamic plugin loader. Behaviour is selected by the request path of the
//! transaction a filter is attached to; response filters consult the
//! path of their paired request. `/panics` exists purely to exercise the
//! engine's panic-containment guarantee and has no counterpart in the
//! canonical traces.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::{
    handler::{FilterCapabilities, FilterFactory, RequestFilter, ResponseFilter},
    transaction::{RequestCtx, ResponseCtx},
};

/// The one URN this engine recognizes out of the box.
pub const UNIT_TEST_URN: &str = "urn:weaver-proxy:unit-test";

const REPLACE_BODY_PATH: &str = "/replacebody";
const TRANSFORM_BODY_PATH: &str = "/transformbody";
const TRANSFORM_BODY_CHUNKS_PATH: &str = "/transformbodychunks";
const PANICS_PATH: &str = "/panics";

const REPLACED_REQUEST_BODY: &[u8] = b"Hello! I am the server!";
const TRANSFORMED_RESPONSE_BODY: &[u8] = b"We have transformed the response!";

/// Factory behind [`UNIT_TEST_URN`].
pub struct UnitTestFactory;

impl FilterFactory for UnitTestFactory {
    fn capabilities(&self) -> FilterCapabilities {
        FilterCapabilities::READS_BODY | FilterCapabilities::WRITES_BODY | FilterCapabilities::REWRITES_HEADERS
    }

    fn new_request_filter(&self) -> Box<dyn RequestFilter> { Box::new(UnitTestRequestFilter) }

    fn new_response_filter(&self) -> Box<dyn ResponseFilter> { Box::new(UnitTestResponseFilter) }
}

struct UnitTestRequestFilter;

#[async_trait]
impl RequestFilter for UnitTestRequestFilter {
    async fn run(self: Box<Self>, mut ctx: RequestCtx) {
        if ctx.headers().uri == REPLACE_BODY_PATH {
            ctx.write_body(Bytes::from_static(REPLACED_REQUEST_BODY)).await;
        } else if ctx.headers().uri == PANICS_PATH {
            panic!("unit-test handler deliberately panicking for /panics");
        }
        // every other path, including /pass, is a no-op pass-through
    }
}

struct UnitTestResponseFilter;

#[async_trait]
impl ResponseFilter for UnitTestResponseFilter {
    async fn run(self: Box<Self>, mut ctx: ResponseCtx) {
        let path = ctx.request_headers().map(|h| h.uri.clone()).unwrap_or_default();
        match path.as_str() {
            TRANSFORM_BODY_PATH => {
                ctx.write_body(Bytes::from_static(TRANSFORMED_RESPONSE_BODY)).await;
            }
            TRANSFORM_BODY_CHUNKS_PATH => wrap_body_in_braces(&mut ctx).await,
            _ => {}
        }
    }
}

async fn wrap_body_in_braces(ctx: &mut ResponseCtx) {
    let mut headers = ctx.headers().clone();
    headers.remove_field("Content-Length");
    ctx.rewrite_headers(&headers).await;

    // A single `RBOD` opens the gate; the host may deliver any number of
    // chunks before the final one (`last == true`). The wrap is emitted as
    // one `WBOD` once the whole body has arrived, not chunk-for-chunk.
    let cap = ctx.max_buffered_body_bytes();
    let mut over_cap_logged = false;
    let mut wrapped = BytesMut::new();
    wrapped.extend_from_slice(b"{");
    loop {
        let (chunk, last) = ctx.read_body_chunk().await;
        wrapped.extend_from_slice(&chunk);
        if !over_cap_logged && wrapped.len() > cap {
            warn!(buffered = wrapped.len(), cap, "aggregate body read exceeded soft cap");
            over_cap_logged = true;
        }
        if last {
            break;
        }
    }
    wrapped.extend_from_slice(b"}");
    ctx.write_body(wrapped.freeze()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urn_constant_matches_wire_value() {
        assert_eq!(UNIT_TEST_URN, "urn:weaver-proxy:unit-test");
    }

    #[test]
    fn fixed_bodies_match_the_canonical_traces() {
        assert_eq!(REPLACED_REQUEST_BODY, b"Hello! I am the server!");
        assert_eq!(TRANSFORMED_RESPONSE_BODY, b"We have transformed the response!");
    }
}
