/// Construct an `Err(Error)` directly, the statement-level counterpart of
/// [`err!`].
#[macro_export]
macro_rules! Err {
	($($args:tt)*) => {
		Err($crate::err!($($args)*))
	};
}

/// Construct an `Error` value. Plain string arguments build `Error::Err`;
/// `Variant(...)` picks a specific variant; `Variant(error!(...))` also logs
/// at error level as a side effect, matching call sites that want the log
/// and the return value to never drift apart.
#[macro_export]
macro_rules! err {
	(Config($item:literal, $msg:literal $(, $($rest:tt)*)?)) => {{
		$crate::error!(config = %$item, $msg $(, $($rest)*)?);
		$crate::error::Error::Config($item, std::format!($msg $(, $($rest)*)?).into())
	}};

	($variant:ident(error!($msg:literal $(, $($rest:tt)*)?))) => {{
		$crate::error!($msg $(, $($rest)*)?);
		$crate::error::Error::$variant(std::format!($msg $(, $($rest)*)?).into())
	}};

	($variant:ident($msg:literal $(, $($rest:tt)*)?)) => {
		$crate::error::Error::$variant(std::format!($msg $(, $($rest)*)?).into())
	};

	($variant:ident) => {
		$crate::error::Error::$variant
	};

	($string:literal$(,)? $($args:tt),*) => {
		$crate::error::Error::Err(std::format!($string, $($args),*).into())
	};
}
