//! Packet tables for protocol 47 (Minecraft 1.8).
//!
//! Handshake, status and login are complete. Play carries the packets the
//! proxy and its plugins inspect; everything else a server sends still
//! parses structurally where possible and is otherwise not in the table.

use std::sync::LazyLock;

use crate::fields::{FieldSpec, Predicate, Selector};
use crate::packet::PacketType;
use crate::registry::{Direction, ProtocolState, ProtocolVersion};

/// Protocol 47, the 1.8.x line.
pub const PROTOCOL_47: i32 = 47;

/// The protocol 47 tables.
pub static V47: LazyLock<ProtocolVersion> = LazyLock::new(build_v47);

fn fields(entries: Vec<(&'static str, FieldSpec)>) -> FieldSpec {
    FieldSpec::Fields(entries)
}

fn var_raw() -> FieldSpec {
    FieldSpec::Raw(Some(Box::new(FieldSpec::VarInt)))
}

fn array(item: FieldSpec) -> FieldSpec {
    FieldSpec::Array {
        len: Box::new(FieldSpec::VarInt),
        item: Box::new(item),
    }
}

fn optional(predicate: Predicate, inner: FieldSpec) -> FieldSpec {
    FieldSpec::Optional {
        predicate,
        inner: Box::new(inner),
    }
}

fn switch(label: &'static str, selector: Selector, arms: Vec<(i64, FieldSpec)>) -> FieldSpec {
    FieldSpec::Switch {
        label,
        selector,
        arms,
    }
}

fn add(
    version: &mut ProtocolVersion,
    name: &'static str,
    id: i32,
    direction: Direction,
    state: ProtocolState,
    entries: Vec<(&'static str, FieldSpec)>,
) {
    version.register(PacketType {
        name,
        id,
        direction,
        state,
        fields: fields(entries),
    });
}

#[allow(clippy::too_many_lines)]
fn build_v47() -> ProtocolVersion {
    use crate::fields::FieldSpec as F;
    use crate::registry::Direction::{ClientBound, ServerBound};
    use crate::registry::ProtocolState::{Handshake, Login, Play, Status};

    let mut v = ProtocolVersion::new(PROTOCOL_47);

    // Handshake
    add(
        &mut v,
        "Handshake",
        0x00,
        ServerBound,
        Handshake,
        vec![
            ("protocol_version", F::VarInt),
            ("server_address", F::String),
            ("server_port", F::UShort),
            ("next_state", F::VarInt),
        ],
    );

    // Status
    add(&mut v, "StatusRequest", 0x00, ServerBound, Status, vec![]);
    add(
        &mut v,
        "PingRequest",
        0x01,
        ServerBound,
        Status,
        vec![("time", F::Long)],
    );
    add(
        &mut v,
        "StatusResponse",
        0x00,
        ClientBound,
        Status,
        vec![("response", F::Json)],
    );
    add(
        &mut v,
        "PongResponse",
        0x01,
        ClientBound,
        Status,
        vec![("time", F::Long)],
    );

    // Login
    add(
        &mut v,
        "LoginStart",
        0x00,
        ServerBound,
        Login,
        vec![("username", F::String)],
    );
    add(
        &mut v,
        "EncryptionResponse",
        0x01,
        ServerBound,
        Login,
        vec![("shared_secret", var_raw()), ("verify_token", var_raw())],
    );
    add(
        &mut v,
        "LoginDisconnect",
        0x00,
        ClientBound,
        Login,
        vec![("reason", F::Json)],
    );
    add(
        &mut v,
        "EncryptionRequest",
        0x01,
        ClientBound,
        Login,
        vec![
            ("server_id", F::String),
            ("public_key", var_raw()),
            ("verify_token", var_raw()),
        ],
    );
    add(
        &mut v,
        "LoginSuccess",
        0x02,
        ClientBound,
        Login,
        vec![("uuid", F::String), ("username", F::String)],
    );
    add(
        &mut v,
        "SetCompression",
        0x03,
        ClientBound,
        Login,
        vec![("threshold", F::VarInt)],
    );

    // Play, client-bound
    add(
        &mut v,
        "KeepAlive",
        0x00,
        ClientBound,
        Play,
        vec![("keep_alive_id", F::VarInt)],
    );
    add(
        &mut v,
        "JoinGame",
        0x01,
        ClientBound,
        Play,
        vec![
            ("entity_id", F::Int),
            ("gamemode", F::UByte),
            ("dimension", F::Byte),
            ("difficulty", F::UByte),
            ("max_players", F::UByte),
            ("level_type", F::String),
            ("reduced_debug_info", F::Bool),
        ],
    );
    add(
        &mut v,
        "ChatMessage",
        0x02,
        ClientBound,
        Play,
        vec![("message", F::Json), ("position", F::Byte)],
    );
    add(
        &mut v,
        "SpawnPosition",
        0x05,
        ClientBound,
        Play,
        vec![("location", F::Position)],
    );
    add(
        &mut v,
        "UpdateHealth",
        0x06,
        ClientBound,
        Play,
        vec![
            ("health", F::Float),
            ("food", F::VarInt),
            ("saturation", F::Float),
        ],
    );
    add(
        &mut v,
        "PlayerPositionAndLook",
        0x08,
        ClientBound,
        Play,
        vec![
            ("x", F::Double),
            ("y", F::Double),
            ("z", F::Double),
            ("yaw", F::Float),
            ("pitch", F::Float),
            ("flags", F::Byte),
        ],
    );
    add(
        &mut v,
        "SpawnPlayer",
        0x0C,
        ClientBound,
        Play,
        vec![
            ("entity_id", F::VarInt),
            ("player_uuid", F::Uuid),
            ("x", F::Int),
            ("y", F::Int),
            ("z", F::Int),
            ("yaw", F::Byte),
            ("pitch", F::Byte),
            ("current_item", F::Short),
            ("metadata", F::Raw(None)),
        ],
    );
    add(
        &mut v,
        "BlockChange",
        0x23,
        ClientBound,
        Play,
        vec![("location", F::Position), ("block_id", F::VarInt)],
    );
    add(
        &mut v,
        "PlayerListItem",
        0x38,
        ClientBound,
        Play,
        vec![
            ("action", F::VarInt),
            (
                "players",
                array(fields(vec![
                    ("uuid", F::Uuid),
                    (
                        "data",
                        switch(
                            "action",
                            |s| s.root().int("action"),
                            vec![
                                (
                                    0,
                                    fields(vec![
                                        ("name", F::String),
                                        (
                                            "properties",
                                            array(fields(vec![
                                                ("name", F::String),
                                                ("value", F::String),
                                                ("is_signed", F::Bool),
                                                (
                                                    "signature",
                                                    optional(
                                                        |s| {
                                                            s.parent()
                                                                .boolean("is_signed")
                                                                .unwrap_or(false)
                                                        },
                                                        F::String,
                                                    ),
                                                ),
                                            ])),
                                        ),
                                        ("gamemode", F::VarInt),
                                        ("ping", F::VarInt),
                                        ("has_display_name", F::Bool),
                                        (
                                            "display_name",
                                            optional(
                                                |s| {
                                                    s.parent()
                                                        .boolean("has_display_name")
                                                        .unwrap_or(false)
                                                },
                                                F::Json,
                                            ),
                                        ),
                                    ]),
                                ),
                                (1, fields(vec![("gamemode", F::VarInt)])),
                                (2, fields(vec![("ping", F::VarInt)])),
                                (
                                    3,
                                    fields(vec![
                                        ("has_display_name", F::Bool),
                                        (
                                            "display_name",
                                            optional(
                                                |s| {
                                                    s.parent()
                                                        .boolean("has_display_name")
                                                        .unwrap_or(false)
                                                },
                                                F::Json,
                                            ),
                                        ),
                                    ]),
                                ),
                                (4, fields(vec![])),
                            ],
                        ),
                    ),
                ])),
            ),
        ],
    );
    add(
        &mut v,
        "Disconnect",
        0x40,
        ClientBound,
        Play,
        vec![("reason", F::Json)],
    );
    add(
        &mut v,
        "SetCompression",
        0x46,
        ClientBound,
        Play,
        vec![("threshold", F::VarInt)],
    );

    // Play, server-bound
    add(
        &mut v,
        "KeepAlive",
        0x00,
        ServerBound,
        Play,
        vec![("keep_alive_id", F::VarInt)],
    );
    add(
        &mut v,
        "ChatMessage",
        0x01,
        ServerBound,
        Play,
        vec![("message", F::String)],
    );
    add(
        &mut v,
        "UseEntity",
        0x02,
        ServerBound,
        Play,
        vec![
            ("target", F::VarInt),
            ("kind", F::VarInt),
            (
                "target_position",
                optional(
                    |s| s.parent().int("kind") == Some(2),
                    fields(vec![("x", F::Float), ("y", F::Float), ("z", F::Float)]),
                ),
            ),
        ],
    );
    add(
        &mut v,
        "Player",
        0x03,
        ServerBound,
        Play,
        vec![("on_ground", F::Bool)],
    );
    add(
        &mut v,
        "PlayerPosition",
        0x04,
        ServerBound,
        Play,
        vec![
            ("x", F::Double),
            ("feet_y", F::Double),
            ("z", F::Double),
            ("on_ground", F::Bool),
        ],
    );
    add(
        &mut v,
        "PlayerLook",
        0x05,
        ServerBound,
        Play,
        vec![
            ("yaw", F::Float),
            ("pitch", F::Float),
            ("on_ground", F::Bool),
        ],
    );
    add(
        &mut v,
        "PlayerPositionAndLook",
        0x06,
        ServerBound,
        Play,
        vec![
            ("x", F::Double),
            ("feet_y", F::Double),
            ("z", F::Double),
            ("yaw", F::Float),
            ("pitch", F::Float),
            ("on_ground", F::Bool),
        ],
    );
    add(
        &mut v,
        "PlayerDigging",
        0x07,
        ServerBound,
        Play,
        vec![
            ("status", F::Byte),
            ("location", F::Position),
            ("face", F::Byte),
        ],
    );
    add(
        &mut v,
        "ClientSettings",
        0x15,
        ServerBound,
        Play,
        vec![
            ("locale", F::String),
            ("view_distance", F::Byte),
            ("chat_mode", F::Byte),
            ("chat_colors", F::Bool),
            ("displayed_skin_parts", F::UByte),
        ],
    );
    add(
        &mut v,
        "ClientStatus",
        0x16,
        ServerBound,
        Play,
        vec![("action_id", F::VarInt)],
    );
    add(
        &mut v,
        "PluginMessage",
        0x17,
        ServerBound,
        Play,
        vec![("channel", F::String), ("data", F::Raw(None))],
    );

    v
}
