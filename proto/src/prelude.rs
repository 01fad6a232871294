// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Prelude to simplify downstream use of protocol objects
//!

pub use crate::{
    button::{ButtonAckReq, ButtonRequestResp},
    failure::{FailureCode, FailureResp},
    initialize::{FeaturesResp, InitializeReq},
    path::{DerivationPath, PathError, NOSTR_PATH},
    public_key::{Curve, GetPublicKeyReq, PublicKeyResp},
    sign_message::{MessageSignatureResp, SignMessageReq, NOSTR_COIN},
    MessageType, ProtoError, WireStatic,
};
