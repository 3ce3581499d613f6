pub mod cleanup_config;
pub mod engine;
pub mod fs;
pub mod report;
pub mod result_error;
pub mod retention;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
