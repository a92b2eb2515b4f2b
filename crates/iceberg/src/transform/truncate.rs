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
pub struct Truncate {
    width: u32,
}

impl Truncate {
    pub fn try_new(width: u32) -> Result<Self> {
        if width == 0 {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Invalid truncate width: 0 (must be > 0)",
            ));
        }
        Ok(Self { width })
    }

    #[inline]
    fn truncate_str(s: &str, width: usize) -> &str {
        match s.char_indices().nth(width) {
            None => s,
            Some((idx, _)) => &s[..idx],
        }
    }

    #[inline]
    fn truncate_i32(v: i32, width: i32) -> i32 {
        v - v.rem_euclid(width)
    }

    #[inline]
    fn truncate_i64(v: i64, width: i64) -> i64 {
        v - v.rem_euclid(width)
    }

    #[inline]
    fn truncate_decimal_i128(v: i128, width: i128) -> i128 {
        v - v.rem_euclid(width)
    }
}

impl TransformFunction for Truncate {
    fn transform_literal(&self, input: &PrimitiveLiteral) -> Result<Option<PrimitiveLiteral>> {
        let truncated = match input {
            PrimitiveLiteral::Int(v) => {
                let width: i32 = self.width.try_into()?;
                PrimitiveLiteral::Int(Self::truncate_i32(*v, width))
            }
            PrimitiveLiteral::Long(v) => {
                PrimitiveLiteral::Long(Self::truncate_i64(*v, self.width as i64))
            }
            PrimitiveLiteral::Decimal(v) => {
                PrimitiveLiteral::Decimal(Self::truncate_decimal_i128(*v, self.width as i128))
            }
            PrimitiveLiteral::String(v) => PrimitiveLiteral::String(
                Self::truncate_str(v, self.width as usize).to_string(),
            ),
            PrimitiveLiteral::Binary(v) => {
                let len = v.len().min(self.width as usize);
                PrimitiveLiteral::Binary(v[..len].to_vec())
            }
            _ => return Err(unsupported("truncate", input)),
        };
        Ok(Some(truncated))
    }
}
