//! Embeddable scripting runtime core: polymorphic values, lazy list
//! representations, encoding conversion, a cooperative event loop and
//! streaming compression transforms.

pub mod channel;
pub mod consts;
pub mod encoding;
pub mod error;
pub mod event;
pub mod interp;
pub mod series;
pub mod sync;
pub mod value;

pub mod prelude {
    pub use crate::channel::zlib::{
        push_transform, FlushMode, Format, GzipHeader, Mode, TransformOptions, ZlibTransform,
    };
    pub use crate::channel::{ByteChannel, Channel, Interest, ReadOutcome};
    pub use crate::encoding::{
        encoding_names, get_encoding, register_descriptor, set_encoding_search_path,
        set_system_encoding, system_encoding, ConvFlags, ConvState, ConvStatus, Converted,
        Encoding,
    };
    pub use crate::error::RuntimeError;
    pub use crate::event::{
        create_exit_handler, do_one_event, finalize, register_event_commands,
        report_background_error, set_background_error_handler, wait_cmd, EventMask, Notifier,
    };
    pub use crate::interp::{CommandResult, Flow, Interp, TraceKind};
    pub use crate::series::Series;
    pub use crate::sync::{CondPair, OnceInit, RecursiveMutex};
    pub use crate::value::{list, register_type, ExtensionRep, ListRep, RegisteredType, Rep, Value};
}
