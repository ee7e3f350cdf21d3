// End-to-end tests: a bridge with an in-memory chat platform moderating a
// fake econ server on a local socket.
#[cfg(test)]
mod tests {
    use crate::bridge::core::NOT_ALLOWED;
    use crate::chat::Role;
    use crate::state::PlayerState;
    use crate::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::{broadcast, mpsc, Notify};
    use tokio::time::timeout;

    const ADMIN: &str = "admin#0001";
    const MODERATOR: &str = "mod#0007";
    const PASSWORD: &str = "secret";
    const WAIT: Duration = Duration::from_secs(5);

    struct FakeEcon {
        address: String,
        lines: mpsc::UnboundedSender<String>,
        received: mpsc::UnboundedReceiver<String>,
    }

    impl FakeEcon {
        async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap().to_string();
            let (lines, mut outgoing) = mpsc::unbounded_channel::<String>();
            let (received_tx, received) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                let (socket, _) = listener.accept().await.unwrap();
                let (read, mut write) = socket.into_split();
                let mut reader = BufReader::new(read).lines();

                write.write_all(b"Enter password:\n").await.unwrap();
                let attempt = reader.next_line().await.unwrap().unwrap_or_default();
                if attempt != PASSWORD {
                    let _ = write.write_all(b"Wrong password. Remaining attempts: 2.\n").await;
                    return;
                }
                write
                    .write_all(b"Authentication successful. External console access granted.\n")
                    .await
                    .unwrap();

                tokio::spawn(async move {
                    while let Ok(Some(line)) = reader.next_line().await {
                        if received_tx.send(line).is_err() {
                            break;
                        }
                    }
                });

                while let Some(line) = outgoing.recv().await {
                    if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
                // dropping the write half closes the connection
            });

            Self {
                address,
                lines,
                received,
            }
        }

        fn send(&self, line: &str) {
            self.lines.send(line.to_string()).unwrap();
        }

        async fn next_received(&mut self) -> String {
            timeout(WAIT, self.received.recv())
                .await
                .expect("server received nothing")
                .expect("connection closed")
        }
    }

    struct Harness {
        bridge: Arc<Bridge>,
        chat: Arc<MemoryChatClient>,
        sent: broadcast::Receiver<ChatMessage>,
        channel: ChannelId,
    }

    impl Harness {
        fn new(servers: &[&str]) -> Self {
            let mut config = BridgeConfig {
                admin: ADMIN.to_string(),
                moderators: vec![MODERATOR.to_string()],
                ..Default::default()
            };
            for address in servers {
                config.servers.insert(address.to_string(), PASSWORD.to_string());
            }
            config.session.verbosity = Verbosity::Full;

            let (bridge, chat) = create_memory_bridge(config);
            let sent = chat.subscribe();
            Self {
                bridge,
                chat,
                sent,
                channel: ChannelId::new("general"),
            }
        }

        async fn say(&self, channel: &ChannelId, author: ChatUser, content: &str) {
            let event = self.chat.post(channel, None, author, content);
            self.bridge.handle_event(event).await;
        }

        async fn admin_says(&self, content: &str) {
            self.say(&self.channel, admin(), content).await;
        }

        /// Waits for the next message sent to `channel` containing `needle`.
        async fn expect_in(&mut self, channel: &ChannelId, needle: &str) -> ChatMessage {
            let sent = &mut self.sent;
            timeout(WAIT, async {
                loop {
                    match sent.recv().await {
                        Ok(message) if &message.channel == channel && message.content.contains(needle) => {
                            return message;
                        }
                        Ok(_) => continue,
                        Err(e) => panic!("chat stream ended: {e}"),
                    }
                }
            })
            .await
            .unwrap_or_else(|_| panic!("no message containing {needle:?}"))
        }

        async fn expect(&mut self, needle: &str) -> ChatMessage {
            let channel = self.channel.clone();
            self.expect_in(&channel, needle).await
        }

        async fn moderate(&mut self, econ: &FakeEcon) -> Arc<SessionHandle> {
            self.admin_says(&format!("#moderate {}", econ.address)).await;
            self.expect(&format!("Started listening to server {}", econ.address)).await;
            self.bridge.registry().by_address(&econ.address).unwrap()
        }
    }

    /// Chat platform on which forwarded chat lines never complete.
    struct StallingChat {
        inner: MemoryChatClient,
        stalled: Notify,
    }

    #[async_trait]
    impl ChatClient for StallingChat {
        fn current_user(&self) -> ChatUser {
            self.inner.current_user()
        }

        async fn send_message(&self, channel: &ChannelId, content: &str) -> Result<MessageId, ChatError> {
            if content.starts_with("[chat]") {
                self.stalled.notify_one();
                std::future::pending::<()>().await;
            }
            self.inner.send_message(channel, content).await
        }

        async fn delete_message(&self, channel: &ChannelId, message: &MessageId) -> Result<(), ChatError> {
            self.inner.delete_message(channel, message).await
        }

        async fn bulk_delete_messages(&self, channel: &ChannelId, messages: &[MessageId]) -> Result<(), ChatError> {
            self.inner.bulk_delete_messages(channel, messages).await
        }

        async fn list_messages(&self, channel: &ChannelId, limit: usize) -> Result<Vec<ChatMessage>, ChatError> {
            self.inner.list_messages(channel, limit).await
        }

        async fn add_reaction(&self, channel: &ChannelId, message: &MessageId, emoji: &str) -> Result<(), ChatError> {
            self.inner.add_reaction(channel, message, emoji).await
        }

        async fn list_reactors(
            &self,
            channel: &ChannelId,
            message: &MessageId,
            emoji: &str,
        ) -> Result<Vec<ChatUser>, ChatError> {
            self.inner.list_reactors(channel, message, emoji).await
        }

        async fn list_roles(&self, guild: &GuildId) -> Result<Vec<Role>, ChatError> {
            self.inner.list_roles(guild).await
        }
    }

    fn admin() -> ChatUser {
        ChatUser::new("1", ADMIN)
    }

    fn moderator() -> ChatUser {
        ChatUser::new("7", MODERATOR)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_forwards_server_lines() {
        let econ = FakeEcon::start().await;
        let mut harness = Harness::new(&[econ.address.as_str()]);
        let session = harness.moderate(&econ).await;
        assert_eq!(session.state(), SessionState::Active);

        econ.send("[2020-05-22 23:01:09][client_enter]: id=3 addr=1.2.3.4:1000 version=1796 name='Foo' clan='' country=-1");
        harness.expect("[server]: 'Foo' joined the server with id 3").await;
        assert_eq!(session.players().player(3).state, PlayerState::InGame);

        econ.send("[net_ban]: banned '1.2.3.4' for 10 minutes (spam)");
        harness
            .expect("**[bans]**: 'Foo' banned for 10m0s with reason: 'spam'")
            .await;
        assert_eq!(session.bans().len(), 1);
        assert_eq!(session.bans().get(0).unwrap().player.name, "Foo");

        econ.send("[chat]: 3:0:Foo: hello *world*");
        harness.expect("[chat]: 3:'Foo': hello \\*world\\*").await;

        assert!(harness.bridge.shutdown().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_moderator_command_is_relayed_with_attribution() {
        let mut econ = FakeEcon::start().await;
        let mut harness = Harness::new(&[econ.address.as_str()]);
        harness.moderate(&econ).await;

        assert_eq!(econ.next_received().await, "ec_output_level 2");

        let channel = harness.channel.clone();
        harness.say(&channel, moderator(), "?kick 3 spam").await;
        assert_eq!(
            econ.next_received().await,
            "echo [bridge] user 'mod_0007' executed rcon 'kick 3 spam'"
        );
        assert_eq!(econ.next_received().await, "kick 3 spam");

        harness.say(&channel, moderator(), "?status").await;
        harness.expect("There are currently no players online.").await;

        assert!(harness.bridge.shutdown().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_second_moderate_for_same_address_is_rejected() {
        let econ = FakeEcon::start().await;
        let mut harness = Harness::new(&[econ.address.as_str()]);
        let session = harness.moderate(&econ).await;

        let other = ChannelId::new("other");
        harness
            .say(&other, admin(), &format!("#moderate {}", econ.address))
            .await;
        harness
            .expect_in(
                &other,
                &format!("The address {} is already registered with a channel.", econ.address),
            )
            .await;

        let bound = harness.bridge.registry().by_address(&econ.address).unwrap();
        assert!(Arc::ptr_eq(&bound, &session));
        assert_eq!(harness.bridge.registry().len(), 1);

        assert!(harness.bridge.shutdown().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_drains_sessions() {
        let econ = FakeEcon::start().await;
        let mut harness = Harness::new(&[econ.address.as_str()]);
        let session = harness.moderate(&econ).await;

        assert!(harness.bridge.shutdown().await);
        harness
            .expect(&format!("Stopped listening to server {}", econ.address))
            .await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(harness.bridge.registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_disconnect_ends_session() {
        let econ = FakeEcon::start().await;
        let mut harness = Harness::new(&[econ.address.as_str()]);
        let session = harness.moderate(&econ).await;

        let address = econ.address.clone();
        drop(econ);

        harness.expect("connection closed by server").await;
        harness
            .expect(&format!("Stopped listening to server {address}"))
            .await;
        timeout(WAIT, session.closed()).await.unwrap();
        assert!(harness.bridge.registry().by_address(&address).is_none());

        // the address is free again; the listener is gone, so the dial fails
        let channel = harness.channel.clone();
        harness.say(&channel, admin(), &format!("#moderate {address}")).await;
        harness.expect("connection error").await;
        harness.bridge.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_interrupts_stalled_forwarding() {
        let econ = FakeEcon::start().await;
        let mut config = BridgeConfig {
            admin: ADMIN.to_string(),
            ..Default::default()
        };
        config.servers.insert(econ.address.clone(), PASSWORD.to_string());
        let chat = Arc::new(StallingChat {
            inner: MemoryChatClient::default(),
            stalled: Notify::new(),
        });
        let bridge = create_bridge(config, chat.clone());

        let session = bridge.moderate(ChannelId::new("general"), None, &econ.address).unwrap();
        timeout(WAIT, session.watch_state().wait_for(|s| *s == SessionState::Active))
            .await
            .unwrap()
            .unwrap();

        econ.send("[chat]: 3:0:Foo: hello");
        timeout(WAIT, chat.stalled.notified()).await.unwrap();

        session.stop();
        timeout(WAIT, session.closed()).await.unwrap();
        assert!(bridge.registry().is_empty());
        assert!(bridge.shutdown().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_server_is_reported_and_unbound() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut harness = Harness::new(&[address.as_str()]);
        let session = harness
            .bridge
            .moderate(harness.channel.clone(), None, &address)
            .unwrap();

        harness.expect("connection error").await;
        timeout(WAIT, session.closed()).await.unwrap();
        assert!(harness.bridge.registry().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_server_address() {
        let mut harness = Harness::new(&[]);
        harness.admin_says("#moderate 9.9.9.9:8303").await;
        harness.expect("unknown server address").await;
        assert!(harness.bridge.registry().is_empty());
    }

    #[tokio::test]
    async fn test_admin_commands_require_admin() {
        let mut harness = Harness::new(&[]);
        let channel = harness.channel.clone();
        harness.say(&channel, moderator(), "#purge").await;
        harness.expect(NOT_ALLOWED).await;
        assert!(harness.bridge.moderators().contains(MODERATOR));
    }

    #[tokio::test]
    async fn test_moderator_commands_ignore_strangers() {
        let harness = Harness::new(&[]);
        let mut sent = harness.chat.subscribe();
        let channel = harness.channel.clone();
        harness.say(&channel, ChatUser::new("9", "stranger#1234"), "?help").await;
        assert!(matches!(sent.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_admin_manages_moderators() {
        let mut harness = Harness::new(&[]);
        harness.admin_says("#add helper#4242").await;
        harness.expect("helper#4242").await;
        assert!(harness.bridge.moderators().contains("helper#4242"));

        harness.admin_says("#remove helper#4242").await;
        harness.expect("helper#4242").await;
        assert!(!harness.bridge.moderators().contains("helper#4242"));
    }
}
