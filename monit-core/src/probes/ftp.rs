//! FTP liveness probe: `220` greeting, `QUIT` acknowledged with `221`.

use super::common::{expect_prefix, ProbeResult};
use crate::transport::Transport;

pub async fn check(transport: &mut Transport) -> ProbeResult {
    expect_prefix(transport, 512, "220").await?;
    transport.print("QUIT\r\n").await?;
    expect_prefix(transport, 512, "221").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::mock_transport;

    #[tokio::test]
    async fn greeting_and_quit_accepted() {
        let mut t = mock_transport(b"220 FTP ready\r\n221 Goodbye\r\n");
        assert!(check(&mut t).await.is_ok());
    }
}
