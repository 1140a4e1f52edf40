/// Records the verifier's decision on a bearer credential.
///
/// Every event is tagged `audit=true`, `auditType="authentication"` and
/// stamped with the request it belongs to, so an `outcome="rejected"` line
/// can be matched with the `auditType="request"` line that
/// [`crate::middleware::RequestContextLayer`] writes when the response goes
/// out. Callers add `outcome` and, once the token is verified, `subject`.
/// Raw tokens and rejection reasons never go into audit events.
///
/// ```ignore
/// audit!(outcome = "accepted", subject = %claims.sub, "Bearer credential verified");
/// audit!(outcome = "rejected", "No bearer credential presented");
/// ```
#[macro_export]
macro_rules! audit {
    ($($arg:tt)+) => {
        $crate::middleware::with_request_info(|ctx| {
            tracing::info!(
                audit = true,
                auditType = "authentication",
                endpoint = %ctx.endpoint,
                host = %ctx.host,
                httpMethod = %ctx.method,
                requestId = %ctx.request_id,
                $($arg)+
            )
        })
    };
}
