mod client;

pub use client::{
    AccountReply, ApiErrorClass, DirectoryListing, Entry, EntryType, NimbusClient, RemoteError,
    TRANSPORT_ERROR_CODE,
};
