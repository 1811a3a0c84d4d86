//! Host prompt composition.

use radio24_core::program::Segment;

/// Guidance used until a schedule prompt has been loaded.
pub const INITIAL_GUIDANCE: &str =
    "24時間ラジオのメインパーソナリティとして、常にリスナーとつながりを持ちながら放送を続けましょう。";

const SPEAKING_STYLE: &str = "【重要】ラジオパーソナリティとしての話し方：
* 1つの話題を深く掘り下げて、延々と話し続ける
* リスナーとの会話を想像しながら、自然な語りかけをする
* 体験談、エピソード、感想を織り交ぜて話す
* 「そうそう、そういえば...」「あ、そうそう...」「実はね...」など自然な接続詞を使う
* リスナーの反応を想像して「みなさんもそう思いますよね？」「きっと共感してくれると思います」など話しかける
* 話題が尽きそうになったら、関連する別の角度から話を続ける";

const SPEAKING_RULES: &str = "【話し方のルール】：
* 無音を作らない。15秒以上の沈黙は禁止。
* 1つの話題を最低3-5分は話し続ける
* 音声は1度に30秒ぶん生成する
* セグメント終了5分前にクロージング、時報で次テーマ宣言。
* NGワード/個人情報は読み上げない。
* エラー時は「機材トラブル」と一言入れてから復旧。";

/// Inputs for one prompt.
pub struct PromptContext<'a> {
    pub theme: &'a str,
    pub segment: Segment,
    pub remaining: chrono::Duration,
    pub queue_top: &'a [String],
    pub guidance: &'a str,
}

/// `mm:ss`, clamped at zero.
pub fn format_remaining(remaining: chrono::Duration) -> String {
    let secs = remaining.num_seconds().max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub fn compose(ctx: &PromptContext<'_>) -> String {
    let queue_info = if ctx.queue_top.is_empty() {
        String::new()
    } else {
        format!("投稿キュー: {}", ctx.queue_top.join("、"))
    };

    format!(
        "システム：あなたは24時間ラジオのメインパーソナリティ「マリン」。放送は切れ目なく続く。\n\n\
         いまのテーマ：{theme}、このセグメント：{segment}（残り{remaining}）。\n\
         {queue_info}\n\n\
         {SPEAKING_STYLE}\n\n\
         {SPEAKING_RULES}\n\n\
         現在の進行ガイダンス：{guidance}",
        theme = ctx.theme,
        segment = ctx.segment,
        remaining = format_remaining(ctx.remaining),
        guidance = ctx.guidance,
    )
}

/// Instruction sent to the host after a segment advance.
pub fn segment_changed(segment: Segment) -> String {
    format!("セグメントが「{segment}」に変更されました。")
}

/// Instruction sent to the host after a theme change.
pub fn theme_changed(theme: &str) -> String {
    format!("テーマが「{theme}」に変更されました。")
}
