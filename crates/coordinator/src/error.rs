// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::collaborators::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u16),
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The abstract error kinds of the commit/group-store response path. Not an
/// error type in the `std::error::Error` sense — `NoError` is a normal,
/// successful outcome carried through the same enum as the failure kinds,
/// mirroring the wire-level status-code convention this vocabulary is drawn
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorErrorCode {
    NoError,
    GroupCoordinatorNotAvailable,
    NotCoordinatorForGroup,
    InvalidCommitOffsetSize,
    OffsetMetadataTooLarge,
    Unknown,
}

impl CoordinatorErrorCode {
    pub fn for_offset_commit(err: StorageError) -> Self {
        match err {
            StorageError::None => Self::NoError,
            StorageError::UnknownTopicOrPartition => Self::GroupCoordinatorNotAvailable,
            StorageError::NotLeaderForPartition => Self::NotCoordinatorForGroup,
            StorageError::MessageSizeTooLarge
            | StorageError::MessageSetSizeTooLarge
            | StorageError::InvalidFetchSize => Self::InvalidCommitOffsetSize,
            StorageError::Other => Self::Unknown,
        }
    }

    pub fn for_group_store(err: StorageError) -> Self {
        match err {
            StorageError::None => Self::NoError,
            StorageError::UnknownTopicOrPartition => Self::GroupCoordinatorNotAvailable,
            StorageError::NotLeaderForPartition => Self::NotCoordinatorForGroup,
            StorageError::MessageSizeTooLarge
            | StorageError::MessageSetSizeTooLarge
            | StorageError::InvalidFetchSize
            | StorageError::Other => Self::Unknown,
        }
    }
}

/// Per-partition offset fetch outcome. `NoOffset` is a non-error absence
/// marker, kept out of [`CoordinatorErrorCode`] because it is never returned
/// from the append/commit path.
#[derive(Debug, Clone, PartialEq)]
pub enum OffsetFetchEntry {
    Found(crate::codec::OffsetKey, crate::codec::OffsetValue),
    NoOffset(crate::codec::OffsetKey),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GetOffsetsResult {
    NotCoordinator(Vec<crate::codec::OffsetKey>),
    Found(Vec<OffsetFetchEntry>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_translate_to_the_documented_codes() {
        assert_eq!(
            CoordinatorErrorCode::for_offset_commit(StorageError::None),
            CoordinatorErrorCode::NoError
        );
        assert_eq!(
            CoordinatorErrorCode::for_offset_commit(StorageError::NotLeaderForPartition),
            CoordinatorErrorCode::NotCoordinatorForGroup
        );
        assert_eq!(
            CoordinatorErrorCode::for_offset_commit(StorageError::MessageSizeTooLarge),
            CoordinatorErrorCode::InvalidCommitOffsetSize
        );
        assert_eq!(
            CoordinatorErrorCode::for_group_store(StorageError::MessageSizeTooLarge),
            CoordinatorErrorCode::Unknown
        );
    }
}
