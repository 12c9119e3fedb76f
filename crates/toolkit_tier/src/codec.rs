// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Binary encoding of keys and values before they cross a tier boundary.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;

/// Encodes a value, failing with [`ErrorKind::NotSerializable`](crate::ErrorKind::NotSerializable).
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, Error> {
    bincode::serialize(value).map(Bytes::from).map_err(Error::not_serializable)
}

/// Decodes a value previously produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    bincode::deserialize(bytes).map_err(Error::not_serializable)
}
