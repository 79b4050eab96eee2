//! Foreign exception translation

use crate::foreign::{CallTarget, ForeignEnv, ObjRef, PrimitiveTag};
use crate::host_lock::{yielding, HostLock};
use crate::BridgeError;

/// Message used when a pending exception cannot be rendered
pub const TRANSLATION_FAILED: &str = "A java exception has occured, but translation failed";

/// Clear the pending exception, if any, and turn it into a host error
///
/// Never leaves an exception pending. Rendering runs the throwable's own
/// `toString()`, so it happens with `lock` released.
pub fn take_exception(env: &dyn ForeignEnv, lock: &dyn HostLock) -> Option<BridgeError> {
    if !env.exception_check() {
        return None;
    }
    let throwable = env.exception_occurred();
    env.exception_clear();
    let Some(throwable) = throwable else {
        return Some(BridgeError::ForeignException(TRANSLATION_FAILED.to_string()));
    };

    let error = match render(env, lock, throwable) {
        Some(text) => BridgeError::ForeignException(text.replace('\n', " ")),
        None => {
            // Report the original on the runtime's own channel instead
            env.exception_clear();
            env.throw(throwable);
            env.exception_describe();
            env.exception_clear();
            tracing::warn!("foreign exception could not be rendered");
            BridgeError::ForeignException(TRANSLATION_FAILED.to_string())
        }
    };
    env.delete_local_ref(throwable);
    Some(error)
}

/// `Err` with the translated pending exception, if there is one
pub fn check_exception(env: &dyn ForeignEnv, lock: &dyn HostLock) -> Result<(), BridgeError> {
    match take_exception(env, lock) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// `toString()` of a throwable; `None` if that throws or yields nothing
fn render(env: &dyn ForeignEnv, lock: &dyn HostLock, throwable: ObjRef) -> Option<String> {
    let class = env.get_object_class(throwable)?;
    let to_string = env.method_id(class, "toString", "()Ljava/lang/String;");
    env.delete_local_ref(class);
    let to_string = to_string?;

    let text = yielding(lock, || {
        env.call_method(CallTarget::Instance(throwable), to_string, &[], PrimitiveTag::Object)
    });
    if env.exception_check() {
        return None;
    }
    let text = text.as_obj()?;
    let rendered = env.string_utf(text);
    env.delete_local_ref(text);
    rendered
}
