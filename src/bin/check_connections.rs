/// 连接检查工具
///
/// 调试用：加载配置后分别测试PLC与SQL数据库的连通性，
/// 打印检查报告，全部通过时退出码为0

use std::sync::Arc;

use batchlog_lib::services::infrastructure::database::{DatabaseSqlWriter, SqlWriterService};
use batchlog_lib::services::infrastructure::plc::{ModbusPlcService, PlcTagService};
use batchlog_lib::utils::config::load_config;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    println!("=== batchlog 连接检查 ===");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config = match load_config(&config_path) {
        Ok(config) => {
            println!("✅ 配置加载成功: {}", config_path);
            config
        }
        Err(e) => {
            println!("❌ 配置加载失败: {}", e);
            std::process::exit(1);
        }
    };

    let mut all_ok = true;

    // PLC检查：读取触发标签与心跳标签
    println!("\n=== PLC检查 ({}:{}) ===", config.plc.ip, config.plc.port);
    let plc = Arc::new(ModbusPlcService::new(config.plc.clone()));
    match plc.read_trigger().await {
        Ok(value) => println!("✅ 触发标签 {} 当前值: {}", config.plc.trigger_tag, value),
        Err(e) => {
            println!("❌ 读取触发标签失败: {}", e);
            all_ok = false;
        }
    }
    match plc.read_heartbeat().await {
        Ok(value) => println!("✅ 心跳标签 {} 当前值: {}", config.plc.heartbeat_tag, value),
        Err(e) => {
            println!("❌ 读取心跳标签失败: {}", e);
            all_ok = false;
        }
    }
    match plc.read_recipe_and_extras().await {
        Ok(record) => println!("✅ 配方读取成功 ({} 个字段)", record.len()),
        Err(e) => {
            println!("❌ 配方读取失败: {}", e);
            all_ok = false;
        }
    }

    // SQL检查：建立连接并执行 SELECT 1
    println!("\n=== SQL数据库检查 ===");
    let sql = DatabaseSqlWriter::new(config.sql.clone());
    match sql.connect().await {
        Ok(()) => {
            if sql.healthy().await {
                println!("✅ SQL数据库连接正常 (表: {})", config.sql.table);
            } else {
                println!("❌ SQL数据库存活检查失败");
                all_ok = false;
            }
        }
        Err(e) => {
            println!("❌ SQL数据库连接失败: {}", e);
            all_ok = false;
        }
    }

    println!();
    if all_ok {
        println!("✅ 所有连接检查通过");
    } else {
        println!("❌ 部分连接检查失败");
        std::process::exit(1);
    }
}
