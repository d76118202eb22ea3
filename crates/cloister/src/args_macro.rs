/// Build entry-point arguments from serde values.
///
/// Evaluates to `Result<Vec<Value>, value::Error>`.
#[macro_export]
macro_rules! args {
    () => {
        ::core::result::Result::<::std::vec::Vec<$crate::value::Value>, $crate::value::Error>::Ok(
            ::std::vec::Vec::new(),
        )
    };
    ($($value:expr),+ $(,)?) => {{
        (|| -> ::core::result::Result<::std::vec::Vec<$crate::value::Value>, $crate::value::Error> {
            Ok(::std::vec![$($crate::value::Value::from_serde(&$value)?),+])
        })()
    }};
}
