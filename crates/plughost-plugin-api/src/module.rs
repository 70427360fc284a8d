//! Module declaration exported by every plugin binary

use crate::endpoint::EntryType;
use std::fmt;

/// Version of this SDK a module was built against
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the exported [`ModuleDeclaration`] static
pub const MODULE_DECLARATION_SYMBOL: &str = "plughost_module_declaration";

/// Receives the entry types a module provides
pub trait EntryRegistrar {
    /// Register `entry` under its fully qualified type name
    fn register(&mut self, name: &str, entry: Box<dyn EntryType>);
}

/// Static description of a plugin module
///
/// Exported under [`MODULE_DECLARATION_SYMBOL`]; use [`export_module!`](crate::export_module)
/// rather than writing it by hand.
#[derive(Clone, Copy)]
pub struct ModuleDeclaration {
    /// SDK version the module was compiled with
    pub api_version: &'static str,

    /// Registers the module's entry types
    pub register: fn(&mut dyn EntryRegistrar),
}

impl ModuleDeclaration {
    /// Declaration for the current SDK version
    pub const fn new(register: fn(&mut dyn EntryRegistrar)) -> Self {
        Self {
            api_version: API_VERSION,
            register,
        }
    }
}

impl fmt::Debug for ModuleDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDeclaration")
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

/// Export a module declaration listing the module's entry types
///
/// ```rust,ignore
/// plughost_plugin_api::export_module! {
///     "test_endpoint::AnEndpoint" => AnEndpoint,
/// }
/// ```
#[macro_export]
macro_rules! export_module {
    ($($name:expr => $ty:ty),+ $(,)?) => {
        #[doc(hidden)]
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static plughost_module_declaration: $crate::ModuleDeclaration =
            $crate::ModuleDeclaration {
                api_version: $crate::API_VERSION,
                register: {
                    fn register(registrar: &mut dyn $crate::EntryRegistrar) {
                        $( registrar.register($name, $crate::entry::<$ty>()); )+
                    }
                    register
                },
            };
    };
}
