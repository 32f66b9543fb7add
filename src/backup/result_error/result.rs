use crate::backup::result_error::error::Error;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithFnName, WithMsg};
use std::fmt::Debug;

pub type Result<T> = std::result::Result<T, Error>;

impl<S: Into<String>, O: Debug + Send + Sync + 'static, R> WithDebugObjectAndFnName<S, O>
    for Result<R>
{
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        self.map_err(|e| e.with_debug_object_and_fn_name(obj, fn_name))
    }
}

impl<R, S: Into<String>> WithMsg<S> for Result<R> {
    fn with_msg(self, msg: S) -> Self {
        self.map_err(|e| e.with_msg(msg))
    }
}

impl<R, S: Into<String>> WithFnName<S> for Result<R> {
    fn with_fn_name(self, fn_name: S) -> Self {
        self.map_err(|e| e.with_fn_name(fn_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_with_fn_name_wraps_err() {
        let res: Result<u8> = Err(Error::InvalidCron("* *".into()));
        match res.with_fn_name("schedule") {
            Err(Error::WithFnName { fn_name, .. }) => assert_eq!(fn_name, "schedule"),
            _ => panic!("Expected WithFnName error"),
        }
    }

    #[test]
    fn test_result_with_msg_keeps_ok() {
        let res: Result<u8> = Ok(1);
        assert_eq!(res.with_msg("unused").unwrap(), 1);
    }
}
