// JSON-RPC server: method dispatch over the Unix socket and the
// native-messaging pipe.

pub mod methods;
pub mod native;
pub mod unix;
