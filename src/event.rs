//! Event loop, background errors, the wait multiplexer and process
//! lifecycle

pub mod bgerror;
pub mod exit;
pub mod notifier;
pub mod wait;

pub use bgerror::{
    background_error_handler, drain_background_errors, report_background_error,
    set_background_error_handler,
};
pub use exit::{
    create_exit_handler, create_late_exit_handler, create_thread_exit_handler,
    delete_exit_handler, exit, finalize, finalize_thread, in_exit, reinitialize, set_exit_proc,
};
pub use notifier::{do_one_event, EventMask, Notifier, TimerToken, WatcherToken};
pub use wait::{register_event_commands, update_cmd, wait_cmd};
