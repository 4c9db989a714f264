#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const ESTATS: &str = "STATUS=S,When=1700000000,Code=70,Msg=CGMiner stats,\
    Description=cgminer 4.11.1|STATS=0,ID=AVA100,Elapsed=7200,\
    MM ID0=Ver[Nano3-20110801] DNA[020100008c3a1ecc] Temp[28] TMax[79] TAvg[70] \
    Fan1[2100] FanR[48%] SoftOFF[0] WORKMODE[0] SF0[325 337 350 362]|";

pub const SUMMARY: &str = "STATUS=S,When=1700000000,Code=11,Msg=Summary,\
    Description=cgminer 4.11.1|SUMMARY,Elapsed=7200,MHS av=4100.00,MHS 30s=4080.50,\
    MHS 1m=4095.10,Accepted=512,Rejected=1,Hardware Errors=0,Best Share=123456|";

pub const POOLS: &str = "STATUS=S,When=1700000000,Code=7,Msg=1 Pool(s),\
    Description=cgminer 4.11.1|POOL=0,URL=stratum+tcp://pool.example.com:3333,\
    Status=Alive,User=me.nano,Accepted=512,Rejected=1|";

pub const VERSION: &str = "STATUS=S,When=1700000000,Code=22,Msg=CGMiner versions,\
    Description=cgminer 4.11.1|VERSION=0,CGMiner=4.11.1,API=3.7,PROD=AvalonMiner Nano3,\
    MODEL=Nano3,MAC=b4a2eb3f2c00|";

pub const HASHPOWER: &str = "STATUS=I,When=1700000000,Code=118,\
    Msg=ASC 0 set info: PS[0 1220 1314 140 1839 1308],Description=cgminer 4.11.1|";

pub const SET_OK: &str = "STATUS=I,When=1700000000,Code=118,Msg=ASC 0 set OK|";

#[derive(Clone)]
pub enum Behavior {
    /// Answer known commands from the table, `SET_OK` to anything else
    Reply(HashMap<String, String>),
    /// Accept and read, never answer
    Silent,
    /// Answer every command with these bytes
    Raw(Vec<u8>),
}

/// A cgminer API endpoint on localhost that records every command it gets.
pub struct FakeMiner {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeMiner {
    pub async fn healthy() -> Self {
        Self::start(Behavior::Reply(healthy_table())).await
    }

    pub async fn replying(overrides: &[(&str, &str)]) -> Self {
        let mut table = healthy_table();
        for (command, reply) in overrides {
            table.insert(command.to_string(), reply.to_string());
        }
        Self::start(Behavior::Reply(table)).await
    }

    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(vec![]));

        let log = received.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let behavior = behavior.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 1024];
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return, // a probe
                        Ok(n) => n,
                    };
                    let command = String::from_utf8_lossy(&buf[..n]).to_string();
                    log.lock().unwrap().push(command.clone());

                    let reply = match behavior {
                        Behavior::Reply(table) => {
                            let mut text = table
                                .get(&command)
                                .cloned()
                                .unwrap_or_else(|| SET_OK.to_string())
                                .into_bytes();
                            text.push(0);
                            text
                        }
                        Behavior::Silent => {
                            std::future::pending::<()>().await;
                            return;
                        }
                        Behavior::Raw(bytes) => bytes,
                    };
                    let _ = socket.write_all(&reply).await;
                });
            }
        });

        FakeMiner {
            addr,
            received,
            task,
        }
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for FakeMiner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn healthy_table() -> HashMap<String, String> {
    [
        ("estats", ESTATS),
        ("summary", SUMMARY),
        ("pools", POOLS),
        ("version", VERSION),
        ("ascset|0,hashpower", HASHPOWER),
    ]
    .into_iter()
    .map(|(command, reply)| (command.to_string(), reply.to_string()))
    .collect()
}

/// An address on localhost that nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
