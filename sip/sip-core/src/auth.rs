use crate::{Error, Request, Response};

/// Hook invoked by [`Endpoint::request_with_context`] when a request is
/// challenged with a 401/407 response.
///
/// Implementations modify the request so it can be resent, typically by
/// adding the credential header and incrementing the CSeq. Credential
/// storage and digest computation are out of scope of the core and live
/// with the implementer.
///
/// [`Endpoint::request_with_context`]: crate::Endpoint::request_with_context
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync + 'static {
    async fn authorize_request(
        &self,
        request: &mut Request,
        response: &Response,
    ) -> Result<(), Error>;
}
