// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use crate::newtype_index;

pub mod points_to;
pub mod points_to_map;
pub mod variable;

newtype_index! {
    /// Dense index of an interned pointer key.
    pub struct PointerId;
}
