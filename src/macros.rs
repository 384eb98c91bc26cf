/// Sends on a `tokio::sync::broadcast` channel, converting the payload with `.into()`.
///
/// Having no subscribers is not an error for telemetry, so send failures are dropped.
#[macro_export]
macro_rules! broadcast {
    ($tx:expr, $data:expr) => {
        let _ = $tx.send($data.into());
    };
}
