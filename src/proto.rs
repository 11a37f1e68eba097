//! Protobuf schemas for wire messages and persisted records.
//!
//! Wire messages use proto2-style optional fields so that a missing field is
//! distinguishable from a zero value. Storage structures are proto3-style.

/// Body of a `SignalMessage`, between the version byte and the MAC.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignalMessage {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub ratchet_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub counter: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub previous_counter: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub ciphertext: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PreKeySignalMessage {
    #[prost(uint32, optional, tag = "1")]
    pub pre_key_id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub base_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub identity_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub message: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "5")]
    pub registration_id: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    pub signed_pre_key_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyExchangeMessage {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub base_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub ratchet_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub identity_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub base_key_signature: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SenderKeyMessage {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub iteration: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub ciphertext: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SenderKeyDistributionMessage {
    #[prost(uint32, optional, tag = "1")]
    pub id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub iteration: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub chain_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub signing_key: Option<Vec<u8>>,
}

/// Persisted form of one session state.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionStructure {
    #[prost(uint32, tag = "1")]
    pub session_version: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub local_identity_public: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub remote_identity_public: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub root_key: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub previous_counter: u32,
    #[prost(message, optional, tag = "6")]
    pub sender_chain: Option<session_structure::Chain>,
    #[prost(message, repeated, tag = "7")]
    pub receiver_chains: Vec<session_structure::Chain>,
    #[prost(message, optional, tag = "8")]
    pub pending_key_exchange: Option<session_structure::PendingKeyExchange>,
    #[prost(message, optional, tag = "9")]
    pub pending_pre_key: Option<session_structure::PendingPreKey>,
    #[prost(uint32, tag = "10")]
    pub remote_registration_id: u32,
    #[prost(uint32, tag = "11")]
    pub local_registration_id: u32,
    #[prost(bool, tag = "12")]
    pub needs_refresh: bool,
    #[prost(bytes = "vec", tag = "13")]
    pub alice_base_key: Vec<u8>,
}

pub mod session_structure {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Chain {
        #[prost(bytes = "vec", tag = "1")]
        pub sender_ratchet_key: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub sender_ratchet_key_private: Vec<u8>,
        #[prost(message, optional, tag = "3")]
        pub chain_key: Option<chain::ChainKey>,
        #[prost(message, repeated, tag = "4")]
        pub message_keys: Vec<chain::MessageKey>,
    }

    pub mod chain {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ChainKey {
            #[prost(uint32, tag = "1")]
            pub index: u32,
            #[prost(bytes = "vec", tag = "2")]
            pub key: Vec<u8>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct MessageKey {
            #[prost(uint32, tag = "1")]
            pub index: u32,
            #[prost(bytes = "vec", tag = "2")]
            pub cipher_key: Vec<u8>,
            #[prost(bytes = "vec", tag = "3")]
            pub mac_key: Vec<u8>,
            #[prost(bytes = "vec", tag = "4")]
            pub iv: Vec<u8>,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PendingKeyExchange {
        #[prost(uint32, tag = "1")]
        pub sequence: u32,
        #[prost(bytes = "vec", tag = "2")]
        pub local_base_key: Vec<u8>,
        #[prost(bytes = "vec", tag = "3")]
        pub local_base_key_private: Vec<u8>,
        #[prost(bytes = "vec", tag = "4")]
        pub local_ratchet_key: Vec<u8>,
        #[prost(bytes = "vec", tag = "5")]
        pub local_ratchet_key_private: Vec<u8>,
        #[prost(bytes = "vec", tag = "7")]
        pub local_identity_key: Vec<u8>,
        #[prost(bytes = "vec", tag = "8")]
        pub local_identity_key_private: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PendingPreKey {
        #[prost(uint32, optional, tag = "1")]
        pub pre_key_id: Option<u32>,
        #[prost(bytes = "vec", tag = "2")]
        pub base_key: Vec<u8>,
        #[prost(uint32, tag = "3")]
        pub signed_pre_key_id: u32,
    }
}

/// Current session plus archived states, most recent first.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordStructure {
    #[prost(message, optional, tag = "1")]
    pub current_session: Option<SessionStructure>,
    #[prost(message, repeated, tag = "2")]
    pub previous_sessions: Vec<SessionStructure>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SenderKeyStateStructure {
    #[prost(uint32, tag = "1")]
    pub sender_key_id: u32,
    #[prost(message, optional, tag = "2")]
    pub sender_chain_key: Option<sender_key_state_structure::SenderChainKey>,
    #[prost(message, optional, tag = "3")]
    pub sender_signing_key: Option<sender_key_state_structure::SenderSigningKey>,
    #[prost(message, repeated, tag = "4")]
    pub sender_message_keys: Vec<sender_key_state_structure::SenderMessageKey>,
}

pub mod sender_key_state_structure {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SenderChainKey {
        #[prost(uint32, tag = "1")]
        pub iteration: u32,
        #[prost(bytes = "vec", tag = "2")]
        pub seed: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SenderMessageKey {
        #[prost(uint32, tag = "1")]
        pub iteration: u32,
        #[prost(bytes = "vec", tag = "2")]
        pub seed: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SenderSigningKey {
        #[prost(bytes = "vec", tag = "1")]
        pub public: Vec<u8>,
        #[prost(bytes = "vec", tag = "2")]
        pub private: Vec<u8>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SenderKeyRecordStructure {
    #[prost(message, repeated, tag = "1")]
    pub sender_key_states: Vec<SenderKeyStateStructure>,
}
