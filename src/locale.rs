//! Localized strings for notice messages and buddy aliases.
//!
//! Notices carry a stable code plus a human-readable message. The message is
//! looked up by key in a [`Strings`] table which ships English defaults and
//! can be overridden from the `[strings]` section of the configuration file:
//!
//! ```toml
//! [strings]
//! core_cctrl_new_buddy = "Neuer Kontakt"
//! core_cctrl_err_masquerade = "Jemand gibt sich als Sie aus"
//! ```
//!
//! Unknown keys resolve to the key itself, so a missing translation never
//! prevents a notice from being emitted.

use std::collections::HashMap;

/// Alias given to buddies that announce themselves with a `ping`.
pub const NEW_BUDDY_KEY: &str = "core_cctrl_new_buddy";

/// Alias given to the buddy entry for our own address.
pub const MYSELF_KEY: &str = "core_cctrl_myself";

const DEFAULTS: &[(&str, &str)] = &[
    (NEW_BUDDY_KEY, "New buddy"),
    (MYSELF_KEY, "Myself"),
    ("core_cctrl_note_started", "Control client started"),
    ("core_cctrl_note_stoped", "Control client stopped"),
    ("core_cctrl_err_socket", "Control client socket error"),
    ("core_cctrl_err_fake_ping", "Possible attack: connection sent pings for several addresses"),
    ("core_cctrl_err_already_pinged", "Possible attack: this buddy is already connected"),
    ("core_cctrl_err_masquerade", "Possible attack: someone pinged us with our own address"),
    ("core_cctrl_err_add_buddy", "Unable to add the new buddy"),
    ("core_cctrl_err_pong", "Received a pong that matches no pending handshake"),
    ("core_parser_err_unknown", "Unknown command"),
    ("core_parser_err_ping", "Malformed ping command"),
    ("core_parser_err_pong", "Malformed pong command"),
    ("core_parser_err_status", "Malformed status command"),
    ("core_parser_err_version", "Malformed version command"),
    ("core_parser_err_message", "Malformed message command"),
    ("core_parser_err_addme", "Malformed add_me command"),
    ("core_parser_err_removeme", "Malformed remove_me command"),
    ("core_parser_err_filename", "Malformed filename command"),
    ("core_parser_err_filedata", "Malformed filedata command"),
    ("core_parser_err_filedataok", "Malformed filedataok command"),
    ("core_parser_err_filedataerror", "Malformed filedataerror command"),
    ("core_parser_err_filestopsending", "Malformed filestopsending command"),
    ("core_parser_err_filestopreceiving", "Malformed filestopreceiving command"),
    ("core_socket_read_closed", "Connection closed by peer"),
    ("core_socket_read_error", "Error while reading from connection"),
    ("core_socket_write_error", "Error while writing to connection"),
    ("core_socket_line_too_long", "Peer sent an oversized line"),
];

/// Table of localized strings.
#[derive(Debug, Clone, PartialEq)]
pub struct Strings {
    table: HashMap<String, String>,
}

impl Default for Strings {
    fn default() -> Self {
        Self {
            table: DEFAULTS
                .iter()
                .map(|(key, text)| (key.to_string(), text.to_string()))
                .collect(),
        }
    }
}

impl Strings {
    /// Builds the default table with `overrides` applied on top.
    pub fn with_overrides<'a, I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut strings = Self::default();
        for (key, text) in overrides {
            strings.table.insert(key.clone(), text.clone());
        }
        strings
    }

    /// Returns the text for `key`, or `key` itself when it has no entry.
    pub fn localized(&self, key: &str) -> String {
        self.table
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}
