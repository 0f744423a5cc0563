use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::CollectError;

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one record mapper; an `Err` or a panic becomes a `CollectError` for that record only.
pub fn map_guarded<T, F>(domain: &'static str, subject: &str, f: F) -> Result<T, CollectError>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(CollectError::record(domain, subject, format!("{e:#}"))),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(domain, subject, panic = %msg, "mapper panicked");
            Err(CollectError::record(domain, subject, format!("mapper panicked: {msg}")))
        }
    }
}

pub(crate) fn describe_panic(payload: Box<dyn std::any::Any + Send>) -> String {
    panic_message(payload.as_ref())
}
