//! The packet registry: a total mapping from `(state, direction, id)` to a
//! concrete field list, expressed as a tagged-variant `Packet` enum instead
//! of the reinterpret-cast `Get<T>()` record the original header used.
//!
//! `define_packets!` generates one struct per packet (field-concatenation
//! `Codec` impl), the `Packet` enum wrapping them, and the `state`/
//! `direction`/`id`/`decode` lookups in one place so the table can't drift
//! out of sync with itself.

use bytes::BytesMut;
use once_cell::sync::Lazy;

use crate::codec::{Array, Codec, Json, VarInt};
use crate::error::Error;
use crate::protocol::{ProtocolDirection, ProtocolState};

macro_rules! define_packets {
    (
        $(
            $state:ident / $direction:ident / $id:literal => $name:ident {
                $( $field:ident : $ty:ty ),* $(,)?
            }
        )*
    ) => {
        $(
            #[derive(Debug, Clone, PartialEq)]
            pub struct $name {
                $( pub $field: $ty, )*
            }

            impl Codec for $name {
                fn encode(&self, out: &mut BytesMut) {
                    $( Codec::encode(&self.$field, out); )*
                }

                fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
                    let mut cursor = *buf;
                    $( let $field = <$ty as Codec>::decode(&mut cursor)?; )*
                    *buf = cursor;
                    Ok($name { $( $field, )* })
                }
            }
        )*

        /// Every packet shape this crate knows how to encode or decode.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Packet {
            $( $name($name), )*
        }

        impl Packet {
            pub fn state(&self) -> ProtocolState {
                match self {
                    $( Packet::$name(_) => ProtocolState::$state, )*
                }
            }

            pub fn direction(&self) -> ProtocolDirection {
                match self {
                    $( Packet::$name(_) => ProtocolDirection::$direction, )*
                }
            }

            pub fn id(&self) -> i32 {
                match self {
                    $( Packet::$name(_) => $id, )*
                }
            }

            /// Encodes just the packet body (id VarInt + fields), not the
            /// outer frame length — that's the parser's job.
            pub fn encode_body(&self, out: &mut BytesMut) {
                VarInt(self.id()).encode(out);
                match self {
                    $( Packet::$name(p) => Codec::encode(p, out), )*
                }
            }

            /// Decodes a packet body (everything after the frame length,
            /// id included) once the caller knows which state/direction it
            /// was read in.
            pub fn decode_body(
                state: ProtocolState,
                direction: ProtocolDirection,
                buf: &mut &[u8],
            ) -> Result<Packet, Error> {
                let VarInt(id) = VarInt::decode(buf)?;
                match (state, id) {
                    $(
                        (ProtocolState::$state, $id)
                            if ProtocolDirection::$direction.matches(direction) =>
                        {
                            <$name as Codec>::decode(buf).map(Packet::$name)
                        }
                    )*
                    _ => Err(Error::BadPacketId {
                        state: format!("{state:?}"),
                        direction: format!("{direction:?}"),
                        id,
                    }),
                }
            }
        }
    };
}

define_packets! {
    Handshaking / Serverbound / 0x00 => Handshake {
        protocol_version: VarInt,
        server_address: String,
        server_port: u16,
        next_state: ProtocolState,
    }

    Play / Clientbound / 0x00 => KeepAlive {
        keep_alive_id: i32,
    }

    Play / Clientbound / 0x01 => JoinGame {
        entity_id: i32,
        game_mode: u8,
        dimension: i8,
        difficulty: u8,
        max_players: u8,
        level_type: String,
    }

    Play / Clientbound / 0x02 => ChatMessage {
        json_data: Json,
    }

    Play / Clientbound / 0x03 => TimeUpdate {
        world_age: i64,
        time_of_day: i64,
    }

    Play / Clientbound / 0x04 => EntityEquipment {
        entity_id: i32,
        slot: i16,
        item_id: i16,
        item_count: i8,
        item_damage: i16,
    }

    Play / Clientbound / 0x05 => SpawnPosition {
        x: i32,
        y: i32,
        z: i32,
    }

    Play / Clientbound / 0x06 => UpdateHealth {
        health: f32,
        food: i16,
        food_saturation: f32,
    }

    Play / Clientbound / 0x07 => Respawn {
        dimension: i32,
        difficulty: u8,
        game_mode: u8,
        level_type: String,
    }

    Play / Clientbound / 0x08 => PlayerPositionAndLook {
        x: i32,
        y: i32,
        stance: i32,
        z: i32,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    }

    Play / Clientbound / 0x09 => HeldItemChange {
        slot: i8,
    }

    Play / Clientbound / 0x0a => UseBed {
        entity_id: i32,
        x: i32,
        y: i8,
        z: i32,
    }

    Play / Clientbound / 0x0b => Animation {
        entity_id: i32,
        animation: i8,
    }

    Play / Clientbound / 0x0c => SpawnPlayer {
        entity_id: i32,
        player_name: String,
        x: i32,
        y: i32,
        z: i32,
        yaw: i8,
        pitch: i8,
        current_item: i16,
    }

    Play / Clientbound / 0x0d => CollectItem {
        collected_entity_id: i32,
        collector_entity_id: i32,
    }

    Play / Clientbound / 0x0e => SpawnObject {
        entity_id: i32,
        object_type: i8,
        x: i32,
        y: i32,
        z: i32,
        pitch: i8,
        yaw: i8,
    }

    Play / Clientbound / 0x0f => SpawnMob {
        entity_id: i32,
        mob_type: u8,
        x: i32,
        y: i32,
        z: i32,
        yaw: i8,
        pitch: i8,
        head_yaw: i8,
    }

    Play / Clientbound / 0x10 => Painting {
        entity_id: i32,
        title: String,
        x: i32,
        y: i32,
        z: i32,
        direction: i32,
    }

    Play / Clientbound / 0x11 => SpawnExperienceOrb {
        entity_id: i32,
        x: i32,
        y: i32,
        z: i32,
        count: i16,
    }

    Play / Clientbound / 0x12 => EntityVelocity {
        entity_id: i32,
        velocity_x: i16,
        velocity_y: i16,
        velocity_z: i16,
    }

    Play / Clientbound / 0x13 => DestroyEntities {
        entity_ids: Array<i8, i32>,
    }
}

/// `(state, direction, id, max_field_size)`. `None` marks packets with an
/// unbounded field (string/array/json), which have no static max.
type SizeEntry = (ProtocolState, ProtocolDirection, i32, Option<usize>);

static PACKET_SIZE_TABLE: Lazy<Vec<SizeEntry>> = Lazy::new(|| {
    use ProtocolDirection::*;
    use ProtocolState::*;
    vec![
        (Handshaking, Serverbound, 0x00, None),
        (Play, Clientbound, 0x00, Some(4)),
        (Play, Clientbound, 0x01, None),
        (Play, Clientbound, 0x02, None),
        (Play, Clientbound, 0x03, Some(16)),
        (Play, Clientbound, 0x04, Some(9)),
        (Play, Clientbound, 0x05, Some(12)),
        (Play, Clientbound, 0x06, Some(10)),
        (Play, Clientbound, 0x07, None),
        (Play, Clientbound, 0x08, Some(25)),
        (Play, Clientbound, 0x09, Some(1)),
        (Play, Clientbound, 0x0a, Some(13)),
        (Play, Clientbound, 0x0b, Some(5)),
        (Play, Clientbound, 0x0c, None),
        (Play, Clientbound, 0x0d, Some(8)),
        (Play, Clientbound, 0x0e, Some(19)),
        (Play, Clientbound, 0x0f, Some(20)),
        (Play, Clientbound, 0x10, None),
        (Play, Clientbound, 0x11, Some(18)),
        (Play, Clientbound, 0x12, Some(10)),
        (Play, Clientbound, 0x13, None),
    ]
});

/// Largest statically-known packet field size across the whole registry,
/// used to pre-size the per-connection receive buffer. Packets with an
/// unbounded field don't contribute a value here; the caller still has to
/// handle them growing the buffer on demand.
pub fn max_known_field_size() -> usize {
    PACKET_SIZE_TABLE
        .iter()
        .filter_map(|(_, _, _, size)| *size)
        .max()
        .unwrap_or(0)
}
