// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use super::{TransformFunction, unsupported};
use crate::spec::PrimitiveLiteral;
use crate::{Error, ErrorKind, Result};

#[derive(Debug)]
pub struct Bucket {
    mod_n: u32,
}

impl Bucket {
    pub fn try_new(mod_n: u32) -> Result<Self> {
        if mod_n == 0 {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Invalid number of buckets: 0 (must be > 0)",
            ));
        }
        Ok(Self { mod_n })
    }
}

impl Bucket {
    /// When switch the hash function, we only need to change this function.
    fn hash_bytes(mut v: &[u8]) -> Result<i32> {
        Ok(murmur3::murmur3_32(&mut v, 0)? as i32)
    }

    fn hash_int(v: i32) -> Result<i32> {
        Self::hash_long(v as i64)
    }

    fn hash_long(v: i64) -> Result<i32> {
        Self::hash_bytes(v.to_le_bytes().as_slice())
    }

    /// Decimal values are hashed using the minimum number of bytes required to hold the unscaled
    /// value as a two's complement big-endian.
    fn hash_decimal(v: i128) -> Result<i32> {
        let bytes = v.to_be_bytes();
        // Drop redundant sign-extension bytes, keeping the sign bit of the first byte intact.
        let mut start = 0;
        while start < bytes.len() - 1 {
            let (b, next) = (bytes[start], bytes[start + 1]);
            if (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0) {
                start += 1;
            } else {
                break;
            }
        }
        Self::hash_bytes(&bytes[start..])
    }

    /// def bucket_N(x) = (murmur3_x86_32_hash(x) & Integer.MAX_VALUE) % N
    fn bucket_n(&self, v: i32) -> i32 {
        (v & i32::MAX) % (self.mod_n as i32)
    }

    fn hash(input: &PrimitiveLiteral) -> Result<i32> {
        match input {
            PrimitiveLiteral::Int(v) | PrimitiveLiteral::Date(v) => Self::hash_int(*v),
            PrimitiveLiteral::Long(v)
            | PrimitiveLiteral::Time(v)
            | PrimitiveLiteral::Timestamp(v)
            | PrimitiveLiteral::Timestamptz(v) => Self::hash_long(*v),
            PrimitiveLiteral::Decimal(v) => Self::hash_decimal(*v),
            PrimitiveLiteral::String(v) => Self::hash_bytes(v.as_bytes()),
            PrimitiveLiteral::Uuid(v) => Self::hash_bytes(v.as_bytes()),
            PrimitiveLiteral::Fixed(v) | PrimitiveLiteral::Binary(v) => Self::hash_bytes(v),
            _ => Err(unsupported("bucket", input)),
        }
    }
}

impl TransformFunction for Bucket {
    fn transform_literal(&self, input: &PrimitiveLiteral) -> Result<Option<PrimitiveLiteral>> {
        Ok(Some(PrimitiveLiteral::Int(self.bucket_n(Self::hash(input)?))))
    }
}
