//! Lua sandbox creation
//!
//! Recipes are declarative, so the sandbox only offers table, string and
//! math functions. There is no filesystem, process or network access, and
//! no way to load other chunks.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table};

/// Create a restricted Lua sandbox with the `slipway` helper table
///
/// # Example
/// ```
/// use slipway_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let recipe: mlua::Table = lua
///     .load(r#"return slipway.recipe { name = "api", base = "python:3.11-slim" }"#)
///     .eval()?;
/// let name: String = recipe.get("name")?;
/// assert_eq!(name, "api");
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;

    // Base library loaders stay reachable even without PACKAGE/IO
    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;

    register_slipway_module(&lua)?;

    Ok(lua)
}

/// Register the `slipway` helper table
///
/// - `slipway.recipe(t)` returns `t` unchanged
/// - `slipway.command(...)` packs its arguments into an argv array
fn register_slipway_module(lua: &Lua) -> LuaResult<()> {
    let slipway = lua.create_table()?;

    let recipe_fn = lua.create_function(|_, definition: Table| Ok(definition))?;
    slipway.set("recipe", recipe_fn)?;

    let command_fn = lua.create_function(|lua, args: mlua::Variadic<String>| {
        lua.create_sequence_from(args.iter().cloned())
    })?;
    slipway.set("command", command_fn)?;

    lua.globals().set("slipway", slipway)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_blocks_io_and_loading() {
        let lua = create_sandbox().unwrap();

        let globals: Vec<bool> = ["io", "os", "require", "dofile", "loadfile", "load"]
            .iter()
            .map(|name| {
                lua.load(format!("return {} == nil", name))
                    .eval::<bool>()
                    .unwrap()
            })
            .collect();
        assert!(globals.iter().all(|missing| *missing));
    }

    #[test]
    fn test_sandbox_keeps_string_helpers() {
        let lua = create_sandbox().unwrap();
        let upper: String = lua.load(r#"return string.upper("api")"#).eval().unwrap();
        assert_eq!(upper, "API");
    }

    #[test]
    fn test_command_helper_builds_argv() {
        let lua = create_sandbox().unwrap();
        let argv: Vec<String> = lua
            .load(r#"return slipway.command("python", "init_db.py")"#)
            .eval()
            .unwrap();
        assert_eq!(argv, vec!["python", "init_db.py"]);
    }
}
