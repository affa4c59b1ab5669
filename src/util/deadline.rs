/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Wall-clock deadlines for handler execution.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// A handler ran past its wall-clock budget.
///
/// The message format is observable: callers and tests match on the literal
/// `handler execution exceeded <ms>ms`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("handler execution exceeded {0}ms")]
pub struct DeadlineExceeded(pub u128);

/// Races `future` against `limit`.
///
/// On breach the future is dropped, which cancels it at its next suspension
/// point; handlers holding non-cancel-safe resources must install their own
/// guards.
pub async fn with_deadline<F, T>(future: F, limit: Duration) -> Result<T, DeadlineExceeded>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(value) => Ok(value),
        Err(_) => Err(DeadlineExceeded(limit.as_millis())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_the_value_when_in_time() {
        let result = with_deadline(async { 42 }, Duration::from_secs(1)).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn breach_error_carries_the_exact_literal() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            42
        };
        let err = with_deadline(slow, Duration::from_millis(1500)).await.unwrap_err();
        assert_eq!(err.to_string(), "handler execution exceeded 1500ms");
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_limits_format_in_milliseconds() {
        let never = std::future::pending::<()>();
        let err = with_deadline(never, Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err.to_string(), "handler execution exceeded 30ms");
    }
}
