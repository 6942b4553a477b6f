use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use futures_util::{SinkExt, StreamExt};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use set_table_core::{ClassicRules, ClientMessage, RoomId, ServerMessage, SetOracle, Slot, UiEvent};

/// 牌桌格子对应的按键，3 行 x 4 列
const KEYMAP: [char; 12] = ['q', 'w', 'e', 'r', 'a', 's', 'd', 'f', 'z', 'x', 'c', 'v'];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let address = std::env::args().nth(1).unwrap_or_else(|| "ws://127.0.0.1:25917/ws".to_string());
    let url = Url::parse(&address)?;

    println!("正在连接到: {}", url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    println!("连接成功!");

    let (mut write, mut read) = ws_stream.split();

    // 启动一个任务来处理从服务器接收的消息
    tokio::spawn(async move {
        let mut view = View::default();
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(server_msg) => {
                        if let Some(line) = view.describe(&server_msg) {
                            // 原始模式下换行不会回到行首
                            print!("<-- {}\r\n", line);
                            let _ = std::io::stdout().flush();
                        }
                    }
                    Err(e) => eprintln!("解析服务器消息失败: {}", e),
                },
                Ok(_) => {}
                Err(e) => {
                    eprintln!("接收消息时出错: {}", e);
                    break;
                }
            }
        }
    });

    // 主任务处理用户输入
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    println!("--- 找组合客户端 ---");
    println!("可用命令:");
    println!("  create <昵称>             - 创建一个新房间");
    println!("  join <房间ID> <昵称>      - 加入一个房间");
    println!("  start [电脑玩家数]        - 开始游戏 (仅房主)");
    println!("  key <格子>                - 按下一个格子 (0-11)");
    println!("  play                      - 进入键盘模式: qwer / asdf / zxcv 对应 12 个格子，Esc 退出");
    println!("  stop                      - 结束游戏 (仅房主)");
    println!("  exit                      - 退出");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        let command = parts.first().copied();

        let client_msg = match command {
            Some("create") => {
                let nickname = parts.get(1).unwrap_or(&"新玩家").to_string();
                Some(ClientMessage::CreateRoom { nickname })
            }
            Some("join") => {
                if parts.len() < 3 {
                    println!("用法: join <房间ID> <昵称>");
                    continue;
                }
                let Ok(room_id) = parts[1].parse::<RoomId>() else {
                    println!("无效的房间ID格式");
                    continue;
                };
                let nickname = parts[2].to_string();
                Some(ClientMessage::JoinRoom { room_id, nickname })
            }
            Some("start") => {
                let Ok(computer_players) = parts.get(1).map_or(Ok(0), |n| n.parse::<usize>()) else {
                    println!("用法: start [电脑玩家数]");
                    continue;
                };
                Some(ClientMessage::StartGame { computer_players })
            }
            Some("key") => {
                let Some(Ok(slot)) = parts.get(1).map(|s| s.parse::<Slot>()) else {
                    println!("用法: key <格子>");
                    continue;
                };
                Some(ClientMessage::KeyPressed { slot })
            }
            Some("play") => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let keyboard = tokio::task::spawn_blocking(move || read_keys(tx));
                while let Some(msg) = rx.recv().await {
                    let payload = serde_json::to_string(&msg)?;
                    write.send(Message::Text(payload.into())).await?;
                }
                keyboard.await??;
                None
            }
            Some("stop") => Some(ClientMessage::StopGame),
            Some("exit") => {
                println!("正在断开连接...");
                break;
            }
            None => continue,
            _ => {
                println!("未知命令: {}", line);
                continue;
            }
        };

        if let Some(msg) = client_msg {
            let payload = serde_json::to_string(&msg)?;
            write.send(Message::Text(payload.into())).await?;
        }
    }

    Ok(())
}

/// 键盘模式: 在原始模式下读取按键，直到按下 Esc
fn read_keys(tx: mpsc::UnboundedSender<ClientMessage>) -> std::io::Result<()> {
    terminal::enable_raw_mode()?;
    print!("进入键盘模式，按 Esc 退出\r\n");
    let result = forward_keys(&tx);
    terminal::disable_raw_mode()?;
    println!();
    result
}

fn forward_keys(tx: &mpsc::UnboundedSender<ClientMessage>) -> std::io::Result<()> {
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Esc => return Ok(()),
            KeyCode::Char(c) => {
                if let Some(slot) = slot_for_key(c) {
                    if tx.send(ClientMessage::KeyPressed { slot }).is_err() {
                        return Ok(());
                    }
                }
            }
            _ => {}
        }
    }
}

fn slot_for_key(key: char) -> Option<Slot> {
    KEYMAP.iter().position(|&k| k == key.to_ascii_lowercase())
}

/// 把服务器消息转成一行文字，倒计时只在整秒变化时显示
#[derive(Default)]
struct View {
    rules: ClassicRules,
    last_second: Option<u64>,
}

impl View {
    fn describe(&mut self, msg: &ServerMessage) -> Option<String> {
        let line = match msg {
            ServerMessage::RoomJoined { room_id, your_seat, host, seats } => {
                let names: Vec<&str> = seats.iter().map(|s| s.nickname.as_str()).collect();
                format!("进入房间 {}，你的座位 {}，房主座位 {}，玩家 {:?}", room_id, your_seat, host, names)
            }
            ServerMessage::PlayerJoined { seat, nickname } => format!("{} 坐在了 {} 号座位", nickname, seat),
            ServerMessage::PlayerLeft { seat } => format!("{} 号座位的玩家离开了", seat),
            ServerMessage::GameStarted { table_size, rules, players } => {
                self.rules = *rules;
                self.last_second = None;
                let names: Vec<&str> = players.iter().map(|s| s.nickname.as_str()).collect();
                format!("游戏开始，{} 个格子，{}，玩家 {:?}", table_size, rules, names)
            }
            ServerMessage::Ui(event) => return self.describe_event(event),
            ServerMessage::GameOver { winners } => format!("游戏结束，赢家 {:?}", winners),
            ServerMessage::Info { message } => format!("[信息] {}", message),
            ServerMessage::Error { message } => format!("[错误] {}", message),
        };
        Some(line)
    }

    fn describe_event(&mut self, event: &UiEvent) -> Option<String> {
        let line = match event {
            UiEvent::PlaceCard { card, slot } => {
                let key = KEYMAP.get(*slot).copied().unwrap_or('?');
                format!("格子 {} [{}]: 牌 {:?}", slot, key, self.rules.features(*card))
            }
            UiEvent::RemoveCard { slot } => format!("格子 {} 的牌被移走", slot),
            UiEvent::PlaceToken { player, slot } => format!("玩家 {} 选中格子 {}", player, slot),
            UiEvent::RemoveToken { player, slot } => format!("玩家 {} 取消格子 {}", player, slot),
            UiEvent::RemoveTokensAt { .. } | UiEvent::RemoveAllTokens => return None,
            UiEvent::SetScore { player, score } => format!("玩家 {} 得分 {}", player, score),
            UiEvent::SetFreeze { player, millis } => {
                if *millis == 0 {
                    format!("玩家 {} 解冻", player)
                } else {
                    format!("玩家 {} 冻结 {:.1} 秒", player, *millis as f64 / 1000.0)
                }
            }
            UiEvent::SetCountdown { millis, warn } => {
                let second = millis.div_ceil(1000);
                if self.last_second == Some(second) {
                    return None;
                }
                self.last_second = Some(second);
                if *warn {
                    format!("!! 剩余 {} 秒", second)
                } else {
                    format!("剩余 {} 秒", second)
                }
            }
            UiEvent::AnnounceWinners { players } => format!("赢家: {:?}", players),
        };
        Some(line)
    }
}
