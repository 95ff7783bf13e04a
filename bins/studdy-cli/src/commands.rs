// CLI commands for StuddyBuddy
use anyhow::{bail, Context, Result};
use std::fs;
use studdy_common::config::Config;
use studdy_common::gamification::{calculate_level, check_badge_thresholds};
use studdy_common::judge::{HttpJudge, JudgeClient};
use studdy_common::srs::{next_interval, Sm2Outcome};
use studdy_common::types::{BadgeId, ExecutionResult, Language};

/// Run a source file through the judge configured in the environment
pub async fn run_file(language: &str, file: &str, stdin: Option<&str>) -> Result<()> {
    let source = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))?;
    let config = Config::from_env().context("Invalid JUDGE0_* configuration")?;
    if config.judge.api_key.is_empty() {
        println!("⚠️  JUDGE0_API_KEY is empty, the judge will likely reject the request");
    }

    let client = JudgeClient::new(HttpJudge::new(&config.judge)?, config.judge.poll);
    println!(
        "🚀 Submitting {} ({} bytes), budget {} ms...",
        file,
        source.len(),
        config.judge.poll.budget().as_millis()
    );

    let result = client.execute(&source, language, stdin).await?;
    print!("{}", render_execution(&result));
    Ok(())
}

fn render_execution(result: &ExecutionResult) -> String {
    let mut out = format!(
        "{} {} (exit {}, {} ms)\n",
        if result.exit_code == 0 { "✅" } else { "❌" },
        result.status_description,
        result.exit_code,
        result.execution_time_ms
    );
    if !result.stdout.is_empty() {
        out.push_str(&format!("\n📤 stdout:\n{}\n", result.stdout.trim_end()));
    }
    if !result.stderr.is_empty() {
        out.push_str(&format!("\n📥 stderr:\n{}\n", result.stderr.trim_end()));
    }
    out
}

pub fn schedule(ease: f64, repetitions: u32, quality: u8) -> Result<()> {
    if quality > 5 {
        bail!("Quality must be between 0 and 5, got {}", quality);
    }
    if ease < 1.3 {
        bail!("Ease factor cannot be below 1.3, got {}", ease);
    }
    print!("{}", render_schedule(&next_interval(ease, repetitions, quality), quality));
    Ok(())
}

fn render_schedule(outcome: &Sm2Outcome, quality: u8) -> String {
    let verdict = if quality < 3 {
        "🔁 Failed recall, chain restarts"
    } else {
        "📈 Successful recall"
    };
    format!(
        "{}\n  Next review in: {} day(s)\n  Ease factor:    {:.2}\n  Repetitions:    {}\n",
        verdict, outcome.interval_days, outcome.ease_factor, outcome.repetitions
    )
}

pub fn level(xp: u64, streak: u32) {
    print!("{}", render_level(xp, streak));
}

fn render_level(xp: u64, streak: u32) -> String {
    let level = calculate_level(xp);
    // the next level starts at 100 * level^2 XP
    let next_at = 100u64
        .saturating_mul(u64::from(level))
        .saturating_mul(u64::from(level));
    let badges: Vec<BadgeId> = check_badge_thresholds(xp, level, streak).into_iter().collect();

    let mut out = format!(
        "⭐ Level {} ({} XP, {} to level {})\n",
        level,
        xp,
        next_at.saturating_sub(xp),
        level + 1
    );
    if badges.is_empty() {
        out.push_str("No badges yet.\n");
    } else {
        out.push_str("🏅 Badges:\n");
        for id in badges {
            let badge = id.badge();
            out.push_str(&format!("  {:<14} {}\n", badge.name, badge.description));
        }
    }
    out
}

pub fn list_languages() {
    println!("📋 Supported Languages:\n");
    println!("{:<12} {:<10}", "NAME", "JUDGE ID");
    println!("{}", "─".repeat(24));
    for language in Language::ALL {
        println!("{:<12} {:<10}", language.to_string(), language.judge_id());
    }
}
