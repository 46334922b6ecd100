use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        play_command(),
        skip_command(),
        shuffle_command(),
        repeat_command(),
        volume_command(),
        stop_command(),
        quit_command(),
        queue_command(),
        ping_command(),
        info_command(),
    ]
}

// Comandos de conexión

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Conecta el bot a tu canal de voz")
}

fn quit_command() -> CreateCommand {
    CreateCommand::new("quit").description("Vacía la cola y desconecta el bot")
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Agrega una canción a la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "volume",
                "Volumen de esta canción (1-200)",
            )
            .min_int_value(1)
            .max_int_value(200),
        )
}

// Comandos de control

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Salta canciones, contando la actual")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "count",
                "Número de canciones a saltar",
            )
            .min_int_value(1)
            .max_int_value(100),
        )
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la reproducción y limpia la cola")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Mezcla la cola sin tocar la canción actual")
}

fn repeat_command() -> CreateCommand {
    CreateCommand::new("repeat")
        .description("Vuelve a encolar cada canción al terminar")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Boolean, "enabled", "Activar repetición")
                .required(true),
        )
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de la sesión")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "level",
                "Nivel de volumen (1-200)",
            )
            .min_int_value(1)
            .max_int_value(200)
            .required(true),
        )
}

// Comandos de cola

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra la cola de reproducción")
}

// Comandos de estado

fn ping_command() -> CreateCommand {
    CreateCommand::new("ping").description("Muestra la latencia del bot")
}

fn info_command() -> CreateCommand {
    CreateCommand::new("info").description("Muestra servidores, miembros y shards del bot")
}
